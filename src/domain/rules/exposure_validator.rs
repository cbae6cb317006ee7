use rust_decimal::Decimal;

use crate::domain::constitution::{Constitution, capital};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Capital discipline for new opens: post-trade deployment must stay inside
/// the [min, max] band (under-deployment is a warning, over-deployment a
/// rejection), per-symbol notional under the cap, margin under the cap.
pub struct ExposureValidator;

impl RuleValidator for ExposureValidator {
    fn name(&self) -> &'static str {
        "exposure"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::OpenPosition(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::OpenPosition(open) = action else {
            return Decision::approved();
        };
        let policy = constitution.capital();
        let mut decision = Decision::approved();

        if open.capital.sleeve_capital <= Decimal::ZERO {
            return Decision::reject(
                capital::DEPLOYMENT_CLAUSE,
                "sleeve capital is not positive".to_string(),
            );
        }

        let added = open.added_notional();
        let utilization_after =
            (open.capital.deployed_notional + added) / open.capital.sleeve_capital;
        if utilization_after > policy.deployment_max {
            decision = decision.merge(Decision::reject(
                capital::DEPLOYMENT_CLAUSE,
                format!(
                    "post-trade deployment {utilization_after:.4} above maximum {}",
                    policy.deployment_max
                ),
            ));
        } else if utilization_after < policy.deployment_min {
            decision = decision.merge(Decision::warn(
                capital::DEPLOYMENT_CLAUSE,
                format!(
                    "post-trade deployment {utilization_after:.4} below target floor {}",
                    policy.deployment_min
                ),
            ));
        } else {
            decision = decision.merge(Decision::approve(
                capital::DEPLOYMENT_CLAUSE,
                format!("post-trade deployment {utilization_after:.4} inside band"),
            ));
        }

        let symbol_after = (open.capital.symbol_notional + added) / open.capital.sleeve_capital;
        if symbol_after > policy.per_symbol_cap {
            decision = decision.merge(Decision::reject(
                capital::PER_SYMBOL_CLAUSE,
                format!(
                    "{} exposure {symbol_after:.4} above cap {}",
                    open.symbol, policy.per_symbol_cap
                ),
            ));
        } else {
            decision = decision.merge(Decision::approve(
                capital::PER_SYMBOL_CLAUSE,
                format!("{} exposure {symbol_after:.4} within cap", open.symbol),
            ));
        }

        let margin_ratio = open.capital.margin_used / open.capital.sleeve_capital;
        if margin_ratio > policy.margin_cap {
            decision = decision.merge(Decision::reject(
                capital::MARGIN_CLAUSE,
                format!(
                    "margin use {margin_ratio:.4} above cap {}",
                    policy.margin_cap
                ),
            ));
        }

        decision
    }

    fn priority(&self) -> u8 {
        50
    }
}
