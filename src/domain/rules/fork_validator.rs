use crate::domain::accounts::AccountState;
use crate::domain::constitution::{Constitution, sleeves};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Forking gate: ACTIVE account, balance at or above the sleeve threshold,
/// no fork already in flight, lifetime fork count under the cap, and an
/// opportunity confidence clearing the constitutional floor.
pub struct ForkValidator;

impl RuleValidator for ForkValidator {
    fn name(&self) -> &'static str {
        "fork"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::ForkAccount(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::ForkAccount(fork) = action else {
            return Decision::approved();
        };
        let clause = sleeves::fork_clause(fork.sleeve);
        let mut decision = Decision::approved();

        if fork.account_state != AccountState::Active {
            decision = decision.merge(Decision::reject(
                "§9.States.ForkGate",
                format!("account is {}, forking requires ACTIVE", fork.account_state),
            ));
        }

        match constitution.sleeve(fork.sleeve).fork_threshold {
            Some(threshold) if fork.current_value >= threshold => {
                decision = decision.merge(Decision::approve(
                    clause,
                    format!(
                        "balance ${} at or above threshold ${threshold}",
                        fork.current_value
                    ),
                ));
            }
            Some(threshold) => {
                decision = decision.merge(Decision::reject(
                    clause,
                    format!(
                        "balance ${} below threshold ${threshold}",
                        fork.current_value
                    ),
                ));
            }
            None => {
                decision = decision.merge(Decision::reject(
                    clause,
                    format!("the {} sleeve does not fork", fork.sleeve),
                ));
            }
        }

        if fork.fork_in_progress {
            decision = decision.merge(Decision::reject(
                clause,
                "a fork is already in progress".to_string(),
            ));
        }

        let capital = constitution.capital();
        if fork.fork_count >= capital.max_forks_per_account {
            decision = decision.merge(Decision::reject(
                clause,
                format!(
                    "fork count {} at lifetime cap {}",
                    fork.fork_count, capital.max_forks_per_account
                ),
            ));
        }

        if fork.confidence < capital.min_fork_confidence {
            decision = decision.merge(Decision::reject(
                "§3.Forking.Confidence",
                format!(
                    "opportunity confidence {} below floor {}",
                    fork.confidence, capital.min_fork_confidence
                ),
            ));
        }

        decision
    }

    fn priority(&self) -> u8 {
        20
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::test_fixtures::gen_fork;
    use rust_decimal_macros::dec;

    #[test]
    fn eligible_fork_is_approved() {
        let constitution = Constitution::builtin();
        let decision = ForkValidator.evaluate(&ProposedAction::ForkAccount(gen_fork()), &constitution);
        assert!(decision.is_approved());
    }

    #[test]
    fn below_threshold_is_rejected() {
        let constitution = Constitution::builtin();
        let mut fork = gen_fork();
        fork.current_value = dec!(99999);
        let decision = ForkValidator.evaluate(&ProposedAction::ForkAccount(fork), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn com_sleeve_never_forks() {
        let constitution = Constitution::builtin();
        let mut fork = gen_fork();
        fork.sleeve = crate::domain::types::Sleeve::Com;
        let decision = ForkValidator.evaluate(&ProposedAction::ForkAccount(fork), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn concurrent_fork_is_rejected() {
        let constitution = Constitution::builtin();
        let mut fork = gen_fork();
        fork.fork_in_progress = true;
        let decision = ForkValidator.evaluate(&ProposedAction::ForkAccount(fork), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn low_confidence_is_rejected() {
        let constitution = Constitution::builtin();
        let mut fork = gen_fork();
        fork.confidence = dec!(0.74);
        let decision = ForkValidator.evaluate(&ProposedAction::ForkAccount(fork), &constitution);
        assert!(decision.is_rejected());
    }
}
