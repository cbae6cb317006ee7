pub mod account_validator;
pub mod action;
pub mod decision;
pub mod delta_validator;
pub mod exposure_validator;
pub mod fork_validator;
pub mod hedge_validator;
pub mod ladder_validator;
pub mod liquidity_validator;
pub mod roll_validator;
pub mod timing_validator;
pub mod transition_validator;
pub mod validator;

pub use action::ProposedAction;
pub use decision::{Citation, Decision, Verdict};
pub use validator::RuleValidator;

use account_validator::AccountValidator;
use delta_validator::DeltaValidator;
use exposure_validator::ExposureValidator;
use fork_validator::ForkValidator;
use hedge_validator::HedgeValidator;
use ladder_validator::LadderValidator;
use liquidity_validator::LiquidityValidator;
use roll_validator::{ExitValidator, RollEconomicsValidator};
use timing_validator::TimingValidator;
use transition_validator::TransitionValidator;

/// The full constitutional validator set, ordered by priority at build time.
pub fn standard_validators() -> Vec<Box<dyn RuleValidator>> {
    let mut validators: Vec<Box<dyn RuleValidator>> = vec![
        Box::new(AccountValidator),
        Box::new(TransitionValidator),
        Box::new(ExitValidator),
        Box::new(ForkValidator),
        Box::new(RollEconomicsValidator),
        Box::new(HedgeValidator),
        Box::new(LadderValidator),
        Box::new(TimingValidator),
        Box::new(DeltaValidator),
        Box::new(ExposureValidator),
        Box::new(LiquidityValidator),
    ];
    validators.sort_by_key(|v| v.priority());
    validators
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validators_are_priority_ordered() {
        let validators = standard_validators();
        let priorities: Vec<u8> = validators.iter().map(|v| v.priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn every_action_kind_has_a_validator() {
        use crate::domain::rules::action::test_fixtures::*;
        use crate::domain::rules::action::*;
        use crate::domain::accounts::AccountState;
        use crate::domain::types::AccountId;

        let actions = [
            ProposedAction::OpenPosition(gen_open()),
            ProposedAction::RollPosition(gen_roll()),
            ProposedAction::ForkAccount(gen_fork()),
            ProposedAction::DeployHedge(spx_hedge()),
            ProposedAction::AccountTransition(AccountTransitionAction {
                account_id: AccountId::generate(),
                from: AccountState::Safe,
                to: AccountState::Active,
            }),
        ];
        let validators = standard_validators();
        for action in actions {
            assert!(
                validators.iter().any(|v| v.applies_to(&action)),
                "no validator applies to {}",
                action.kind()
            );
        }
    }
}
