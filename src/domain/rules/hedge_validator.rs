use crate::domain::constitution::{Constitution, hedging};
use crate::domain::rules::action::{HedgeInstrumentKind, ProposedAction};
use crate::domain::rules::decision::Decision;
use crate::domain::rules::validator::RuleValidator;

/// Hedge deployment gate: VIX at or above the hedged-week trigger, spend
/// within the budget band, instrument and delta matching the hedge policy,
/// DTE inside the hedge band.
pub struct HedgeValidator;

impl RuleValidator for HedgeValidator {
    fn name(&self) -> &'static str {
        "hedge"
    }

    fn applies_to(&self, action: &ProposedAction) -> bool {
        matches!(action, ProposedAction::DeployHedge(_))
    }

    fn evaluate(&self, action: &ProposedAction, constitution: &Constitution) -> Decision {
        let ProposedAction::DeployHedge(hedge) = action else {
            return Decision::approved();
        };
        let policy = constitution.hedging();
        let mut decision = Decision::approved();

        if policy.hedged_week_triggered(hedge.vix) {
            decision = decision.merge(Decision::approve(
                hedging::VIX_TRIGGER_CLAUSE,
                format!(
                    "VIX {} at or above hedged-week trigger {}",
                    hedge.vix, policy.vix_hedged_week
                ),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                hedging::VIX_TRIGGER_CLAUSE,
                format!(
                    "VIX {} below hedged-week trigger {}",
                    hedge.vix, policy.vix_hedged_week
                ),
            ));
        }

        let spend_after = hedge.hedge_book_notional + hedge.cost;
        let budget_cap = hedge.total_capital * policy.budget_max_pct;
        if spend_after > budget_cap {
            decision = decision.merge(Decision::reject(
                hedging::BUDGET_CLAUSE,
                format!(
                    "hedge book ${spend_after} would exceed budget cap ${budget_cap}"
                ),
            ));
        } else {
            decision = decision.merge(Decision::approve(
                hedging::BUDGET_CLAUSE,
                format!("hedge book ${spend_after} within budget cap ${budget_cap}"),
            ));
        }

        let instrument_ok = match hedge.instrument {
            HedgeInstrumentKind::SpxPut => hedge.symbol == "SPX",
            HedgeInstrumentKind::VixCall => hedge.symbol == "VIX",
        };
        if instrument_ok {
            decision = decision.merge(Decision::approve(
                hedging::INSTRUMENT_CLAUSE,
                format!("{} matches the hedge instrument set", hedge.symbol),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                hedging::INSTRUMENT_CLAUSE,
                format!("{} is not a hedge instrument", hedge.symbol),
            ));
        }

        if hedge.instrument == HedgeInstrumentKind::SpxPut {
            let deviation = (hedge.delta - policy.spx_put_delta).abs();
            if deviation > policy.spx_put_delta_tolerance {
                decision = decision.merge(Decision::reject(
                    hedging::INSTRUMENT_CLAUSE,
                    format!(
                        "SPX put delta {} outside {} ± {}",
                        hedge.delta, policy.spx_put_delta, policy.spx_put_delta_tolerance
                    ),
                ));
            }
        }

        if policy.dte.contains(hedge.dte) {
            decision = decision.merge(Decision::approve(
                hedging::DTE_CLAUSE,
                format!("hedge DTE {} within [{}, {}]", hedge.dte, policy.dte.min, policy.dte.max),
            ));
        } else {
            decision = decision.merge(Decision::reject(
                hedging::DTE_CLAUSE,
                format!(
                    "hedge DTE {} outside [{}, {}]",
                    hedge.dte, policy.dte.min, policy.dte.max
                ),
            ));
        }

        decision
    }

    fn priority(&self) -> u8 {
        30
    }
}
