use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Capital deployment policy shared by all sleeves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalPolicy {
    /// Target deployment band as a fraction of sleeve capital.
    pub deployment_min: Decimal,
    pub deployment_max: Decimal,
    /// Maximum notional in any single symbol as a fraction of sleeve capital.
    pub per_symbol_cap: Decimal,
    /// Maximum margin use as a fraction of account value.
    pub margin_cap: Decimal,
    /// Orders above this many contracts are split into slices.
    pub slice_threshold: i64,
    /// Per-account daily submitted-contract cap.
    pub daily_contract_cap: i64,
    /// How many times a single account may fork over its lifetime.
    pub max_forks_per_account: u32,
    /// Minimum forking-opportunity confidence required to proceed.
    pub min_fork_confidence: Decimal,
}

pub const DEPLOYMENT_CLAUSE: &str = "§4.Capital.Deployment";
pub const PER_SYMBOL_CLAUSE: &str = "§4.Capital.PerSymbol";
pub const MARGIN_CLAUSE: &str = "§4.Capital.Margin";
pub const SLICE_CLAUSE: &str = "§4.Capital.Slice";
pub const DAILY_CAP_CLAUSE: &str = "§4.Capital.DailyCap";
