use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Everything the audit log records, one kind per observable event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SystemStart,
    SystemStop,
    PostureChange,
    RuleEvaluation,
    OrderEvent,
    PositionEvent,
    DuplicateSubmit,
    AccountTransition,
    ProtocolEscalation,
    ProtocolDeEscalation,
    ForkReserved,
    ForkSealed,
    ForkReleased,
    ConsolidationSealed,
    FeedDegraded,
    MarketAlert,
    Reconciliation,
    HedgeEvent,
    DataStale,
    HealthCheck,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::SystemStart => "system_start",
            AuditKind::SystemStop => "system_stop",
            AuditKind::PostureChange => "posture_change",
            AuditKind::RuleEvaluation => "rule_evaluation",
            AuditKind::OrderEvent => "order_event",
            AuditKind::PositionEvent => "position_event",
            AuditKind::DuplicateSubmit => "duplicate_submit",
            AuditKind::AccountTransition => "account_transition",
            AuditKind::ProtocolEscalation => "protocol_escalation",
            AuditKind::ProtocolDeEscalation => "protocol_de_escalation",
            AuditKind::ForkReserved => "fork_reserved",
            AuditKind::ForkSealed => "fork_sealed",
            AuditKind::ForkReleased => "fork_released",
            AuditKind::ConsolidationSealed => "consolidation_sealed",
            AuditKind::FeedDegraded => "feed_degraded",
            AuditKind::MarketAlert => "market_alert",
            AuditKind::Reconciliation => "reconciliation",
            AuditKind::HedgeEvent => "hedge_event",
            AuditKind::DataStale => "data_stale",
            AuditKind::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system_start" => Ok(AuditKind::SystemStart),
            "system_stop" => Ok(AuditKind::SystemStop),
            "posture_change" => Ok(AuditKind::PostureChange),
            "rule_evaluation" => Ok(AuditKind::RuleEvaluation),
            "order_event" => Ok(AuditKind::OrderEvent),
            "position_event" => Ok(AuditKind::PositionEvent),
            "duplicate_submit" => Ok(AuditKind::DuplicateSubmit),
            "account_transition" => Ok(AuditKind::AccountTransition),
            "protocol_escalation" => Ok(AuditKind::ProtocolEscalation),
            "protocol_de_escalation" => Ok(AuditKind::ProtocolDeEscalation),
            "fork_reserved" => Ok(AuditKind::ForkReserved),
            "fork_sealed" => Ok(AuditKind::ForkSealed),
            "fork_released" => Ok(AuditKind::ForkReleased),
            "consolidation_sealed" => Ok(AuditKind::ConsolidationSealed),
            "feed_degraded" => Ok(AuditKind::FeedDegraded),
            "market_alert" => Ok(AuditKind::MarketAlert),
            "reconciliation" => Ok(AuditKind::Reconciliation),
            "hedge_event" => Ok(AuditKind::HedgeEvent),
            "data_stale" => Ok(AuditKind::DataStale),
            "health_check" => Ok(AuditKind::HealthCheck),
            other => Err(format!("unknown audit kind: {other}")),
        }
    }
}

/// An event as handed to the log. The writer assigns sequence and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub actor: String,
    pub clause_refs: Vec<String>,
    pub subject_ids: Vec<String>,
    pub payload: serde_json::Value,
    pub constitution_version: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, actor: impl Into<String>) -> Self {
        Self {
            kind,
            actor: actor.into(),
            clause_refs: Vec::new(),
            subject_ids: Vec::new(),
            payload: serde_json::Value::Null,
            constitution_version: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject_ids.push(subject.into());
        self
    }

    pub fn with_clause(mut self, clause: impl Into<String>) -> Self {
        self.clause_refs.push(clause.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_constitution_version(mut self, version: impl Into<String>) -> Self {
        self.constitution_version = Some(version.into());
        self
    }
}

/// A committed record: an event plus its assigned sequence and timestamp.
/// Append-only; never mutated after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Query filter for `query(filter, limit)`. All fields conjunctive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub kind: Option<AuditKind>,
    pub actor: Option<String>,
    pub subject_id: Option<String>,
    pub since_seq: Option<i64>,
    pub until_seq: Option<i64>,
}

impl AuditFilter {
    pub fn for_kind(kind: AuditKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }
}
