use chrono::{Datelike, Timelike};

use crate::domain::constitution::{Constitution, sleeves};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;
use crate::domain::types::Sleeve;

/// Schedule and expiry timing: opens must land in the sleeve's weekly window
/// and inside its DTE band (the Gen stress band applies only when the
/// proposal opted in). Rolls re-check the target DTE.
pub struct TimingValidator;

impl TimingValidator {
    fn check_dte(
        constitution: &Constitution,
        sleeve: Sleeve,
        dte: u32,
        stress_mode: bool,
        what: &str,
    ) -> Decision {
        let policy = constitution.sleeve(sleeve);
        let clause = sleeves::dte_clause(sleeve);
        let band = match (stress_mode, policy.stress_dte) {
            (true, Some(stress)) => stress,
            _ => policy.dte,
        };
        if band.contains(dte) {
            Decision::approve(
                clause,
                format!("{what} DTE {dte} within [{}, {}]", band.min, band.max),
            )
        } else {
            Decision::reject(
                clause,
                format!("{what} DTE {dte} outside [{}, {}]", band.min, band.max),
            )
        }
    }
}

impl RuleValidator for TimingValidator {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(
            action,
            ProposedAction::OpenPosition(_) | ProposedAction::RollPosition(_)
        )
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        match action {
            ProposedAction::OpenPosition(open) => {
                let policy = constitution.sleeve(open.sleeve);
                let schedule_clause = sleeves::schedule_clause(open.sleeve);
                let weekday = open.proposed_at.weekday();
                let time = open.proposed_at.time();

                let schedule = if policy.schedule.admits(weekday, time) {
                    Decision::approve(
                        schedule_clause,
                        format!(
                            "{weekday} {:02}:{:02} inside the {} window",
                            time.hour(),
                            time.minute(),
                            open.sleeve
                        ),
                    )
                } else {
                    Decision::reject(
                        schedule_clause,
                        format!(
                            "{weekday} {:02}:{:02} outside the {} window ({} {}-{})",
                            time.hour(),
                            time.minute(),
                            open.sleeve,
                            policy.schedule.weekday,
                            policy.schedule.open,
                            policy.schedule.close
                        ),
                    )
                };

                schedule.merge(Self::check_dte(
                    constitution,
                    open.sleeve,
                    open.dte,
                    open.stress_mode,
                    "open",
                ))
            }
            ProposedAction::RollPosition(roll) => {
                Self::check_dte(constitution, roll.sleeve, roll.new_dte, false, "roll target")
            }
            _ => Decision::approved(),
        }
    }

    fn priority(&self) -> u8 {
        30
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::test_fixtures::gen_open;
    use chrono::{TimeZone, Utc};

    #[test]
    fn in_window_open_is_approved() {
        let constitution = Constitution::builtin();
        let decision =
            TimingValidator.evaluate(&ProposedAction::OpenPosition(gen_open()), &constitution);
        assert!(decision.is_approved());
    }

    #[test]
    fn wrong_weekday_is_rejected() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        // A Friday.
        open.proposed_at = Utc.with_ymd_and_hms(2025, 6, 6, 10, 0, 0).unwrap();
        let decision = TimingValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn after_window_close_is_rejected() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.proposed_at = Utc.with_ymd_and_hms(2025, 6, 5, 11, 1, 0).unwrap();
        let decision = TimingValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn dte_outside_band_is_rejected() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.dte = 30;
        let decision = TimingValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn stress_mode_widens_gen_band() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.dte = 3;
        open.stress_mode = true;
        let decision =
            TimingValidator.evaluate(&ProposedAction::OpenPosition(open.clone()), &constitution);
        assert!(decision.is_approved());

        open.stress_mode = false;
        let decision = TimingValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }
}
