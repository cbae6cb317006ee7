pub mod manager;
pub mod metrics;

pub use manager::{FreshnessPolicy, MarketDataManager, QuoteStream};
pub use metrics::{AlertThresholds, SymbolMetrics};
