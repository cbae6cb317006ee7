use crate::domain::constitution::{Constitution, llms};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// LEAP ladder entries. The whole LLMS section is optional: without it in the
/// loaded document, ladder actions are rejected citing the missing section.
pub struct LadderValidator;

impl RuleValidator for LadderValidator {
    fn name(&self) -> &'static str {
        "ladder"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::LadderEntry(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::LadderEntry(entry) = action else {
            return Decision::approved();
        };
        let Some(policy) = constitution.llms() else {
            return Decision::reject(
                llms::SECTION_CLAUSE,
                "constitution document carries no LLMS section".to_string(),
            );
        };
        let mut decision = Decision::approved();

        let band = policy.delta_band(entry.rung);
        if band.contains(entry.delta) {
            decision = decision.merge(Decision::approve(
                llms::DELTA_CLAUSE,
                format!(
                    "{:?} rung delta {} within [{}, {}]",
                    entry.rung, entry.delta, band.min, band.max
                ),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                llms::DELTA_CLAUSE,
                format!(
                    "{:?} rung delta {} outside [{}, {}]",
                    entry.rung, entry.delta, band.min, band.max
                ),
            ));
        }

        let (months_min, months_max) = policy.months_band(entry.rung);
        if (months_min..=months_max).contains(&entry.months_to_expiry) {
            decision = decision.merge(Decision::approve(
                llms::DURATION_CLAUSE,
                format!(
                    "{} months to expiry within [{months_min}, {months_max}]",
                    entry.months_to_expiry
                ),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                llms::DURATION_CLAUSE,
                format!(
                    "{} months to expiry outside [{months_min}, {months_max}]",
                    entry.months_to_expiry
                ),
            ));
        }

        decision
    }

    fn priority(&self) -> u8 {
        30
    }
}
