use crate::domain::constitution::{Constitution, sleeves};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Delta must sit inside the sleeve's band, boundaries included. Applies to
/// new opens and to the target strike of a roll.
pub struct DeltaValidator;

impl RuleValidator for DeltaValidator {
    fn name(&self) -> &'static str {
        "delta"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(
            action,
            ProposedAction::OpenPosition(_) | ProposedAction::RollPosition(_)
        )
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let (sleeve, delta, what) = match action {
            ProposedAction::OpenPosition(a) => (a.sleeve, a.delta, "open"),
            ProposedAction::RollPosition(a) => (a.sleeve, a.new_delta, "roll target"),
            _ => return Decision::approved(),
        };
        let band = constitution.sleeve(sleeve).delta;
        let clause = sleeves::delta_clause(sleeve);
        if band.contains(delta) {
            Decision::approve(
                clause,
                format!("{what} delta {delta} within [{}, {}]", band.min, band.max),
            )
        } else {
            Decision::reject(
                clause,
                format!("{what} delta {delta} outside [{}, {}]", band.min, band.max),
            )
        }
    }

    fn priority(&self) -> u8 {
        40
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::test_fixtures::{gen_open, gen_roll};
    use rust_decimal_macros::dec;

    #[test]
    fn band_boundaries_are_approved() {
        let constitution = Constitution::builtin();
        for delta in [dec!(0.40), dec!(0.45)] {
            let mut open = gen_open();
            open.delta = delta;
            let decision =
                DeltaValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
            assert!(decision.is_approved(), "delta {delta} should be approved");
        }
    }

    #[test]
    fn outside_band_is_rejected_with_clause() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.delta = dec!(0.60);
        let decision = DeltaValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
        assert_eq!(decision.clause_refs(), vec!["§2.GenAcc.Delta"]);
    }

    #[test]
    fn roll_target_delta_checked_against_sleeve_band() {
        let constitution = Constitution::builtin();
        let mut roll = gen_roll();
        roll.new_delta = dec!(0.39);
        let decision = DeltaValidator.evaluate(&ProposedAction::RollPosition(roll), &constitution);
        assert!(decision.is_rejected());
    }
}
