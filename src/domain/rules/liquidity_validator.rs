use rust_decimal::Decimal;

use crate::domain::constitution::{Constitution, liquidity};
use crate::domain::rules::action::ProposedAction;
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Liquidity guards for new opens: open interest, daily volume, bid-ask
/// spread against mid, and order size against average daily volume. A guard
/// within its warning fraction of the limit attaches a WARNING.
pub struct LiquidityValidator;

impl RuleValidator for LiquidityValidator {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::OpenPosition(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::OpenPosition(open) = action else {
            return Decision::approved();
        };
        let policy = constitution.liquidity();
        let mut decision = Decision::approved();

        if open.liquidity.open_interest < policy.min_open_interest {
            decision = decision.merge(Decision::reject(
                liquidity::OPEN_INTEREST_CLAUSE,
                format!(
                    "open interest {} below minimum {}",
                    open.liquidity.open_interest, policy.min_open_interest
                ),
            ));
        } else {
            decision = decision.merge(Decision::approve(
                liquidity::OPEN_INTEREST_CLAUSE,
                format!("open interest {}", open.liquidity.open_interest),
            ));
        }

        if open.liquidity.daily_volume < policy.min_daily_volume {
            decision = decision.merge(Decision::reject(
                liquidity::VOLUME_CLAUSE,
                format!(
                    "daily volume {} below minimum {}",
                    open.liquidity.daily_volume, policy.min_daily_volume
                ),
            ));
        } else {
            decision = decision.merge(Decision::approve(
                liquidity::VOLUME_CLAUSE,
                format!("daily volume {}", open.liquidity.daily_volume),
            ));
        }

        let spread_pct = open.liquidity.spread_pct();
        if spread_pct > policy.max_spread_pct {
            decision = decision.merge(Decision::reject(
                liquidity::SPREAD_CLAUSE,
                format!(
                    "spread {spread_pct:.4} of mid above maximum {}",
                    policy.max_spread_pct
                ),
            ));
        } else if spread_pct > policy.max_spread_pct * policy.warning_fraction {
            decision = decision.merge(Decision::warn(
                liquidity::SPREAD_CLAUSE,
                format!(
                    "spread {spread_pct:.4} approaching maximum {}",
                    policy.max_spread_pct
                ),
            ));
        } else {
            decision = decision.merge(Decision::approve(
                liquidity::SPREAD_CLAUSE,
                format!("spread {spread_pct:.4} of mid"),
            ));
        }

        if open.liquidity.avg_daily_volume > 0 {
            let order_fraction =
                Decimal::from(open.contracts) / Decimal::from(open.liquidity.avg_daily_volume);
            if order_fraction > policy.max_adv_fraction {
                decision = decision.merge(Decision::reject(
                    liquidity::ADV_CLAUSE,
                    format!(
                        "order is {order_fraction:.4} of ADV, above cap {}",
                        policy.max_adv_fraction
                    ),
                ));
            } else if order_fraction > policy.max_adv_fraction * policy.warning_fraction {
                decision = decision.merge(Decision::warn(
                    liquidity::ADV_CLAUSE,
                    format!(
                        "order is {order_fraction:.4} of ADV, approaching cap {}",
                        policy.max_adv_fraction
                    ),
                ));
            } else {
                decision = decision.merge(Decision::approve(
                    liquidity::ADV_CLAUSE,
                    format!("order is {order_fraction:.4} of ADV"),
                ));
            }
        } else {
            decision = decision.merge(Decision::reject(
                liquidity::ADV_CLAUSE,
                "no average daily volume available".to_string(),
            ));
        }

        decision
    }

    fn priority(&self) -> u8 {
        60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::action::test_fixtures::gen_open;
    use crate::domain::rules::decision::Verdict;
    use rust_decimal_macros::dec;

    #[test]
    fn liquid_instrument_passes_all_guards() {
        let constitution = Constitution::builtin();
        let decision =
            LiquidityValidator.evaluate(&ProposedAction::OpenPosition(gen_open()), &constitution);
        assert_eq!(decision.verdict, Verdict::Approved);
        assert_eq!(decision.citations.len(), 4);
    }

    #[test]
    fn thin_open_interest_is_rejected() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.liquidity.open_interest = 499;
        let decision =
            LiquidityValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn wide_spread_is_rejected() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.liquidity.bid = dec!(2.30);
        open.liquidity.ask = dec!(2.70);
        let decision =
            LiquidityValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }

    #[test]
    fn spread_near_limit_warns() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        // 4.4% of mid: over 80% of the 5% limit, under the limit itself.
        open.liquidity.bid = dec!(2.445);
        open.liquidity.ask = dec!(2.555);
        let decision =
            LiquidityValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert_eq!(decision.verdict, Verdict::Warning);
    }

    #[test]
    fn oversized_order_vs_adv_is_rejected() {
        let constitution = Constitution::builtin();
        let mut open = gen_open();
        open.contracts = 50;
        open.liquidity.avg_daily_volume = 400;
        let decision =
            LiquidityValidator.evaluate(&ProposedAction::OpenPosition(open), &constitution);
        assert!(decision.is_rejected());
    }
}
