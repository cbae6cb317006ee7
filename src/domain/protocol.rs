//! Protocol level derivation: the ATR-normalized breach math that drives the
//! four-level escalation ladder.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::types::{PositionId, StrategyKind};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolLevel {
    L0,
    L1,
    L2,
    L3,
}

impl ProtocolLevel {
    pub fn next_down(&self) -> Option<ProtocolLevel> {
        match self {
            ProtocolLevel::L0 => None,
            ProtocolLevel::L1 => Some(ProtocolLevel::L0),
            ProtocolLevel::L2 => Some(ProtocolLevel::L1),
            ProtocolLevel::L3 => Some(ProtocolLevel::L2),
        }
    }
}

impl fmt::Display for ProtocolLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolLevel::L0 => write!(f, "L0"),
            ProtocolLevel::L1 => write!(f, "L1"),
            ProtocolLevel::L2 => write!(f, "L2"),
            ProtocolLevel::L3 => write!(f, "L3"),
        }
    }
}

/// What the monitor wants done about a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    None,
    PrepareRoll,
    ExecuteRoll,
    Exit,
}

impl PendingAction {
    /// Default pending action when escalating into a level.
    pub fn for_level(level: ProtocolLevel) -> PendingAction {
        match level {
            ProtocolLevel::L0 | ProtocolLevel::L1 => PendingAction::None,
            ProtocolLevel::L2 => PendingAction::PrepareRoll,
            ProtocolLevel::L3 => PendingAction::Exit,
        }
    }
}

/// Per-position escalation state owned by the Protocol Engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub position_id: PositionId,
    pub level: ProtocolLevel,
    pub entered_at: DateTime<Utc>,
    pub last_breach_multiple: Decimal,
    pub pending_action: PendingAction,
    /// When the breach first measured a full level below the current one;
    /// de-escalation requires a full monitoring interval of dwell.
    pub below_lower_since: Option<DateTime<Utc>>,
}

impl ProtocolState {
    pub fn new(position_id: PositionId, now: DateTime<Utc>) -> Self {
        Self {
            position_id,
            level: ProtocolLevel::L0,
            entered_at: now,
            last_breach_multiple: Decimal::ZERO,
            pending_action: PendingAction::None,
            below_lower_since: None,
        }
    }
}

/// Adverse distance past the strike: K−S for a short put, S−K for a covered
/// call, floored at zero. Long strategies have no breach envelope.
pub fn breach_magnitude(strategy: StrategyKind, spot: Decimal, strike: Decimal) -> Decimal {
    let raw = match strategy {
        StrategyKind::Csp | StrategyKind::LeapPut => strike - spot,
        StrategyKind::Cc | StrategyKind::LeapCall => spot - strike,
        StrategyKind::Stock => Decimal::ZERO,
    };
    raw.max(Decimal::ZERO)
}

/// Breach expressed in ATR multiples; zero when the ATR is unusable.
pub fn breach_multiple(magnitude: Decimal, atr: Decimal) -> Decimal {
    if atr <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    magnitude / atr
}
