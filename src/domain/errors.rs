use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::types::{AccountId, Sleeve};

/// Errors raised while loading or validating the Constitution document.
/// All of these are fatal before start: the engine refuses to run under an
/// inconsistent rule document.
#[derive(Debug, Error)]
pub enum ConstitutionError {
    #[error("Failed to read constitution document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse constitution document: {0}")]
    Parse(String),

    #[error("Sleeve allocation ratios sum to {sum}, expected 1.0")]
    RatioSum { sum: Decimal },

    #[error("{clause}: band minimum {min} must be below maximum {max}")]
    InvertedBand {
        clause: &'static str,
        min: Decimal,
        max: Decimal,
    },

    #[error("{clause}: {reason}")]
    InvalidParameter { clause: &'static str, reason: String },

    #[error("VIX triggers must be strictly increasing: {hedged} / {safe} / {kill}")]
    VixOrdering {
        hedged: Decimal,
        safe: Decimal,
        kill: Decimal,
    },

    #[error("ATR period {period} below minimum of 2")]
    AtrPeriod { period: usize },

    #[error("Constitution is immutable at runtime; restart to apply a new document")]
    Immutable,
}

/// Programming-error surface of the Rules Engine: requests arriving from the
/// command boundary with kinds the engine does not know.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Unknown action kind: {kind}")]
    UnknownAction { kind: String },

    #[error("Unknown sleeve: {name}")]
    UnknownSleeve { name: String },
}

/// Errors from ATR computation and its data sources.
#[derive(Debug, Error)]
pub enum AtrError {
    #[error("No data source produced bars for {symbol} (tried: {attempted:?})")]
    NoData {
        symbol: String,
        attempted: Vec<String>,
    },

    #[error("All sources yielded invalid data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("Newest bar for {symbol} is {age_hours}h old, tolerance {tolerance_hours}h")]
    Stale {
        symbol: String,
        age_hours: i64,
        tolerance_hours: i64,
    },

    #[error("Source {source_name} timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("Source {source_name} fetch failed: {reason}")]
    Fetch { source_name: String, reason: String },
}

/// Errors related to market data distribution and freshness.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("No feed available for {symbol}")]
    NoFeed { symbol: String },

    #[error("Subscription to {source_name} failed: {reason}")]
    SubscriptionFailed { source_name: String, reason: String },

    #[error("Quote for {symbol} is stale: age {age_ms}ms > threshold {threshold_ms}ms")]
    Stale {
        symbol: String,
        age_ms: i64,
        threshold_ms: i64,
    },
}

/// Errors raised by the Execution Engine and broker boundary.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Submission queue full (capacity {capacity}); retry or drop")]
    Backpressure { capacity: usize },

    #[error("Order {client_order_id} rejected by venue: {reason}")]
    BrokerReject {
        client_order_id: String,
        reason: String,
    },

    #[error("{what} exceeded deadline of {deadline_ms}ms")]
    Timeout { what: String, deadline_ms: u64 },

    #[error("Invalid order transition {from} -> {to} for {client_order_id}")]
    InvalidTransition {
        client_order_id: String,
        from: String,
        to: String,
    },

    #[error("Daily volume cap for account {account_id} would be exceeded: {submitted} + {proposed} > {cap}")]
    DailyCapExceeded {
        account_id: AccountId,
        submitted: i64,
        proposed: i64,
        cap: i64,
    },

    #[error("Unknown order: {client_order_id}")]
    UnknownOrder { client_order_id: String },

    #[error("Broker connection unavailable: {reason}")]
    Disconnected { reason: String },
}

/// Errors related to account lifecycle and capital accounting.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Unknown account: {id}")]
    Unknown { id: AccountId },

    #[error("Invalid account transition {from} -> {to} for {id}")]
    InvalidTransition {
        id: AccountId,
        from: String,
        to: String,
    },

    #[error("Insufficient capital in {id}: need ${need}, available ${available}")]
    InsufficientCapital {
        id: AccountId,
        need: Decimal,
        available: Decimal,
    },

    #[error("Fork already in progress for {id}")]
    ForkInProgress { id: AccountId },

    #[error("Account {id} below {sleeve} fork threshold: ${value} < ${threshold}")]
    BelowForkThreshold {
        id: AccountId,
        sleeve: Sleeve,
        value: Decimal,
        threshold: Decimal,
    },

    #[error("Reconciliation mismatch for {id}: {detail}")]
    ReconciliationMismatch { id: AccountId, detail: String },

    #[error("Capital invariant violated for {id}: {detail}")]
    InvariantViolation { id: AccountId, detail: String },

    #[error("Account tree would contain a cycle through {id}")]
    CyclicParent { id: AccountId },

    #[error("Audit append failed: {0}")]
    Audit(String),
}

/// Structured error surface of the orchestrator's command API. External
/// collaborators match on these; they never see opaque strings.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Constitution(#[from] ConstitutionError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error("Unknown position: {id}")]
    UnknownPosition { id: crate::domain::types::PositionId },
}

/// Errors from the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit writer task has shut down")]
    WriterClosed,

    #[error("Audit storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Audit append timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}
