use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::sleeves::Band;

/// LEAP ladder management parameters. This whole section is optional; when the
/// document omits it, ladder actions are rejected citing the missing section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderPolicy {
    pub growth_delta: Band,
    pub hedge_delta: Band,
    /// Months to expiry admitted for growth LEAPs.
    pub growth_months_min: u32,
    pub growth_months_max: u32,
    /// Months to expiry admitted for hedge LEAPs.
    pub hedge_months_min: u32,
    pub hedge_months_max: u32,
    /// Full profit take at this gain fraction (2.00 = +200%).
    pub profit_take_threshold: Decimal,
    /// Partial profit take at this gain fraction.
    pub partial_profit_threshold: Decimal,
    pub partial_profit_fraction: Decimal,
    /// Stop out at this loss fraction (negative).
    pub stop_loss_threshold: Decimal,
    /// Share of quarterly reinvestment directed to the ladder.
    pub reinvestment_share: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderRung {
    Growth,
    Hedge,
}

impl LadderPolicy {
    pub fn delta_band(&self, rung: LadderRung) -> Band {
        match rung {
            LadderRung::Growth => self.growth_delta,
            LadderRung::Hedge => self.hedge_delta,
        }
    }

    pub fn months_band(&self, rung: LadderRung) -> (u32, u32) {
        match rung {
            LadderRung::Growth => (self.growth_months_min, self.growth_months_max),
            LadderRung::Hedge => (self.hedge_months_min, self.hedge_months_max),
        }
    }
}

pub const SECTION_CLAUSE: &str = "§17.Llms";
pub const DELTA_CLAUSE: &str = "§17.Llms.Delta";
pub const DURATION_CLAUSE: &str = "§17.Llms.Duration";
pub const PROFIT_TAKE_CLAUSE: &str = "§17.Llms.ProfitTake";
pub const STOP_LOSS_CLAUSE: &str = "§17.Llms.StopLoss";
