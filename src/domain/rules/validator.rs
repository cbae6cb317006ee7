use crate::domain::constitution::Constitution;
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;

/// One constitutional check. Validators are pure and synchronous: rule
/// evaluation is CPU-only and never suspends. The engine folds the
/// decisions of every applicable validator; there is no validator
/// inheritance anywhere.
pub trait RuleValidator: Send + Sync {
    /// Unique name for logging and audit payloads.
    fn name(&self) -> &'static str;

    /// Whether this validator has anything to say about the action.
    fn applies_to(&self, action: &ProposedAction) -> bool;

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision;

    /// Lower runs earlier. Cheap structural checks go first so a rejected
    /// action fails before the heavier arithmetic runs.
    fn priority(&self) -> u8 {
        100
    }
}
