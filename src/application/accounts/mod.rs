pub mod attribution;
pub mod consolidation;
pub mod forking;
pub mod manager;

pub use attribution::{AttributionTracker, PerformanceReport};
pub use consolidation::ConsolidationOutcome;
pub use forking::{ForkingOpportunity, ForkingUrgency};
pub use manager::{AccountManager, AccountManagerHandle, ForkOutcome};
