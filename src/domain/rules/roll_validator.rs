use rust_decimal::Decimal;

use crate::domain::constitution::{Constitution, protocol};
use crate::domain::rules::action::{CloseReason, ProposedAction};
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Roll economics: a roll costing more than the threshold fraction of the
/// remaining credit is forbidden and the position is forced to an L3 exit.
/// Exactly the threshold is still approved.
pub struct RollEconomicsValidator;

impl RuleValidator for RollEconomicsValidator {
    fn name(&self) -> &'static str {
        "roll_economics"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::RollPosition(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::RollPosition(roll) = action else {
            return Decision::approved();
        };
        let threshold = constitution.protocol().roll_cost_threshold;

        if roll.remaining_credit <= Decimal::ZERO {
            return Decision::reject(
                protocol::ROLL_COST_CLAUSE,
                format!(
                    "no remaining credit ({}) to fund a roll; exit instead",
                    roll.remaining_credit
                ),
            );
        }

        let ratio = roll.roll_cost / roll.remaining_credit;
        if ratio > threshold {
            Decision::reject(
                protocol::ROLL_COST_CLAUSE,
                format!(
                    "roll cost is {ratio:.4} of remaining credit, above {threshold}; forcing L3 exit"
                ),
            )
        } else {
            Decision::approve(
                protocol::ROLL_COST_CLAUSE,
                format!("roll cost is {ratio:.4} of remaining credit"),
            )
        }
    }

    fn priority(&self) -> u8 {
        30
    }
}

/// Closes are always admissible; the evaluation exists so every exit carries
/// a citation on the audit trail naming why it happened.
pub struct ExitValidator;

impl RuleValidator for ExitValidator {
    fn name(&self) -> &'static str {
        "exit"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::ClosePosition(_))
    }

    fn evaluate(&self, action: &ProposedAction, _constitution: &Constitution) -> Decision {
        let ProposedAction::ClosePosition(close) = action else {
            return Decision::approved();
        };
        match close.reason {
            CloseReason::ProtocolExit => Decision::approve(
                protocol::ESCALATION_CLAUSE,
                format!("protocol-mandated exit of {}", close.position_id),
            ),
            CloseReason::Assignment => Decision::approve(
                "§7.Assignment",
                format!("assignment handling for {}", close.position_id),
            ),
            CloseReason::Expiry => Decision::approve(
                "§1.Schedule.Management",
                format!("expiry management for {}", close.position_id),
            ),
            CloseReason::ProfitTarget | CloseReason::Operator => Decision::approve(
                "§1.Schedule.Management",
                format!("discretion-free close of {}", close.position_id),
            ),
        }
    }

    fn priority(&self) -> u8 {
        20
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::test_fixtures::gen_roll;
    use rust_decimal_macros::dec;

    #[test]
    fn cheap_roll_is_approved() {
        let constitution = Constitution::builtin();
        let decision = RollEconomicsValidator
            .evaluate(&ProposedAction::RollPosition(gen_roll()), &constitution);
        assert!(decision.is_approved());
    }

    #[test]
    fn exactly_half_is_approved() {
        let constitution = Constitution::builtin();
        let mut roll = gen_roll();
        roll.remaining_credit = dec!(1.00);
        roll.roll_cost = dec!(0.50);
        let decision =
            RollEconomicsValidator.evaluate(&ProposedAction::RollPosition(roll), &constitution);
        assert!(decision.is_approved());
    }

    #[test]
    fn over_half_forces_exit() {
        let constitution = Constitution::builtin();
        let mut roll = gen_roll();
        roll.remaining_credit = dec!(1.00);
        roll.roll_cost = dec!(0.55);
        let decision =
            RollEconomicsValidator.evaluate(&ProposedAction::RollPosition(roll), &constitution);
        assert!(decision.is_rejected());
        assert_eq!(decision.clause_refs(), vec!["§6.Protocol.RollCost"]);
    }

    #[test]
    fn exhausted_credit_cannot_fund_a_roll() {
        let constitution = Constitution::builtin();
        let mut roll = gen_roll();
        roll.remaining_credit = dec!(0);
        let decision =
            RollEconomicsValidator.evaluate(&ProposedAction::RollPosition(roll), &constitution);
        assert!(decision.is_rejected());
    }
}
