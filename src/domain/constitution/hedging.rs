use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::sleeves::{Band, DteBand};

/// Tail-hedge policy: budget band, VIX triggers, instrument parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgePolicy {
    pub budget_min_pct: Decimal,
    pub budget_max_pct: Decimal,
    /// VIX above this starts a hedged week.
    pub vix_hedged_week: Decimal,
    /// VIX above this moves the system to SAFE.
    pub vix_safe_mode: Decimal,
    /// VIX above this trips the kill switch.
    pub vix_kill_switch: Decimal,
    /// Target delta for SPX protective puts, with an admitted tolerance.
    pub spx_put_delta: Decimal,
    pub spx_put_delta_tolerance: Decimal,
    /// VIX call strike = current VIX + this buffer.
    pub vix_call_strike_buffer: Decimal,
    pub dte: DteBand,
    /// Deviation from target hedge notional that triggers a rebalance.
    pub rebalance_threshold: Decimal,
}

impl HedgePolicy {
    pub fn budget_band(&self) -> Band {
        Band::new(self.budget_min_pct, self.budget_max_pct)
    }

    pub fn hedged_week_triggered(&self, vix: Decimal) -> bool {
        vix >= self.vix_hedged_week
    }

    pub fn safe_mode_triggered(&self, vix: Decimal) -> bool {
        vix >= self.vix_safe_mode
    }

    pub fn kill_switch_triggered(&self, vix: Decimal) -> bool {
        vix >= self.vix_kill_switch
    }
}

pub const BUDGET_CLAUSE: &str = "§5.Hedging.Budget";
pub const VIX_TRIGGER_CLAUSE: &str = "§5.Hedging.VixTriggers";
pub const INSTRUMENT_CLAUSE: &str = "§5.Hedging.Instrument";
pub const DTE_CLAUSE: &str = "§5.Hedging.Dte";
pub const REBALANCE_CLAUSE: &str = "§5.Hedging.Rebalance";

/// Instruments the hedge book may hold.
pub const HEDGE_INSTRUMENTS: [&str; 2] = ["SPX", "VIX"];

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn vix_triggers_fire_at_threshold() {
        let policy = HedgePolicy {
            budget_min_pct: dec!(0.05),
            budget_max_pct: dec!(0.10),
            vix_hedged_week: dec!(50),
            vix_safe_mode: dec!(65),
            vix_kill_switch: dec!(80),
            spx_put_delta: dec!(0.10),
            spx_put_delta_tolerance: dec!(0.02),
            vix_call_strike_buffer: dec!(5),
            dte: DteBand { min: 30, max: 90 },
            rebalance_threshold: dec!(0.20),
        };
        assert!(!policy.hedged_week_triggered(dec!(49.9)));
        assert!(policy.hedged_week_triggered(dec!(50)));
        assert!(!policy.safe_mode_triggered(dec!(64)));
        assert!(policy.safe_mode_triggered(dec!(65)));
        assert!(policy.kill_switch_triggered(dec!(80)));
    }
}
