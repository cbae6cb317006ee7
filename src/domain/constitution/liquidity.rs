use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidity guards every order must clear before placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPolicy {
    pub min_open_interest: i64,
    pub min_daily_volume: i64,
    /// Maximum bid-ask spread as a fraction of mid.
    pub max_spread_pct: Decimal,
    /// Maximum order size as a fraction of average daily volume.
    pub max_adv_fraction: Decimal,
    /// Fraction of a hard limit at which a warning is attached.
    pub warning_fraction: Decimal,
}

pub const OPEN_INTEREST_CLAUSE: &str = "§8.Liquidity.OpenInterest";
pub const VOLUME_CLAUSE: &str = "§8.Liquidity.Volume";
pub const SPREAD_CLAUSE: &str = "§8.Liquidity.Spread";
pub const ADV_CLAUSE: &str = "§8.Liquidity.AdvCap";
