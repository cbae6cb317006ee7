use crate::domain::accounts::AccountState;
use crate::domain::constitution::Constitution;
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Account state transitions must follow the constitutional table; anything
/// else is an invariant breach surfaced as a rejection.
pub struct TransitionValidator;

pub const TRANSITION_CLAUSE: &str = "§9.States.Transition";

impl RuleValidator for TransitionValidator {
    fn name(&self) -> &'static str {
        "transition"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::AccountTransition(_))
    }

    fn evaluate(&self, action: &ProposedAction, _constitution: &Constitution) -> Decision {
        let ProposedAction::AccountTransition(transition) = action else {
            return Decision::approved();
        };
        if AccountState::transition_allowed(transition.from, transition.to) {
            Decision::approve(
                TRANSITION_CLAUSE,
                format!("{} -> {}", transition.from, transition.to),
            )
        } else {
            Decision::reject(
                TRANSITION_CLAUSE,
                format!("{} -> {} is not a legal transition", transition.from, transition.to),
            )
        }
    }

    fn priority(&self) -> u8 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::AccountTransitionAction;
    use crate::domain::types::AccountId;

    fn action(from: AccountState, to: AccountState) -> ProposedAction {
        ProposedAction::AccountTransition(AccountTransitionAction {
            account_id: AccountId::generate(),
            from,
            to,
        })
    }

    #[test]
    fn legal_transition_is_approved() {
        let constitution = Constitution::builtin();
        let decision =
            TransitionValidator.evaluate(&action(AccountState::Safe, AccountState::Active), &constitution);
        assert!(decision.is_approved());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let constitution = Constitution::builtin();
        let decision = TransitionValidator.evaluate(
            &action(AccountState::Suspended, AccountState::Active),
            &constitution,
        );
        assert!(decision.is_rejected());
    }
}
