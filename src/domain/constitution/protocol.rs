use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::protocol::ProtocolLevel;

/// Protocol Engine parameters: ATR-normalized breach thresholds and the
/// monitoring cadence ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolPolicy {
    pub atr_period: usize,
    pub level1_multiple: Decimal,
    pub level2_multiple: Decimal,
    pub level3_multiple: Decimal,
    pub cadence_l0_secs: u64,
    pub cadence_l1_secs: u64,
    pub cadence_l2_secs: u64,
    pub cadence_l3_secs: u64,
    pub stop_loss_multiple: Decimal,
    pub max_loss_fraction: Decimal,
    /// Rolls costing more than this fraction of remaining credit force L3 exit.
    pub roll_cost_threshold: Decimal,
}

impl ProtocolPolicy {
    pub fn cadence(&self, level: ProtocolLevel) -> Duration {
        let secs = match level {
            ProtocolLevel::L0 => self.cadence_l0_secs,
            ProtocolLevel::L1 => self.cadence_l1_secs,
            ProtocolLevel::L2 => self.cadence_l2_secs,
            ProtocolLevel::L3 => self.cadence_l3_secs,
        };
        Duration::from_secs(secs)
    }

    /// Boundary multiples belong to the higher level: exactly 1.0x is L1.
    pub fn level_for_multiple(&self, multiple: Decimal) -> ProtocolLevel {
        if multiple >= self.level3_multiple {
            ProtocolLevel::L3
        } else if multiple >= self.level2_multiple {
            ProtocolLevel::L2
        } else if multiple >= self.level1_multiple {
            ProtocolLevel::L1
        } else {
            ProtocolLevel::L0
        }
    }

    /// The multiple below which a position qualifies for the given level,
    /// used when testing de-escalation dwell.
    pub fn lower_threshold(&self, level: ProtocolLevel) -> Decimal {
        match level {
            ProtocolLevel::L0 => self.level1_multiple,
            ProtocolLevel::L1 => self.level2_multiple,
            ProtocolLevel::L2 => self.level3_multiple,
            ProtocolLevel::L3 => Decimal::MAX,
        }
    }
}

pub const ATR_PERIOD_CLAUSE: &str = "§6.Protocol.AtrPeriod";
pub const ESCALATION_CLAUSE: &str = "§6.Protocol.Escalation";
pub const STOP_LOSS_CLAUSE: &str = "§6.Protocol.StopLoss";
pub const MAX_LOSS_CLAUSE: &str = "§6.Protocol.MaxLoss";
pub const ROLL_COST_CLAUSE: &str = "§6.Protocol.RollCost";

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> ProtocolPolicy {
        ProtocolPolicy {
            atr_period: 5,
            level1_multiple: dec!(1.0),
            level2_multiple: dec!(2.0),
            level3_multiple: dec!(3.0),
            cadence_l0_secs: 300,
            cadence_l1_secs: 60,
            cadence_l2_secs: 30,
            cadence_l3_secs: 1,
            stop_loss_multiple: dec!(3.0),
            max_loss_fraction: dec!(0.05),
            roll_cost_threshold: dec!(0.50),
        }
    }

    #[test]
    fn boundaries_belong_to_the_higher_level() {
        let p = policy();
        assert_eq!(p.level_for_multiple(dec!(0.99)), ProtocolLevel::L0);
        assert_eq!(p.level_for_multiple(dec!(1.0)), ProtocolLevel::L1);
        assert_eq!(p.level_for_multiple(dec!(1.99)), ProtocolLevel::L1);
        assert_eq!(p.level_for_multiple(dec!(2.0)), ProtocolLevel::L2);
        assert_eq!(p.level_for_multiple(dec!(3.0)), ProtocolLevel::L3);
        assert_eq!(p.level_for_multiple(dec!(7.5)), ProtocolLevel::L3);
    }

    #[test]
    fn cadence_ladder() {
        let p = policy();
        assert_eq!(p.cadence(ProtocolLevel::L0), Duration::from_secs(300));
        assert_eq!(p.cadence(ProtocolLevel::L3), Duration::from_secs(1));
    }
}
