use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::protocol::ProtocolLevel;
use crate::domain::types::{AccountId, PositionId, StrategyKind};

/// Option contract multiplier.
pub const CONTRACT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Assigned,
    Expired,
    Rolled,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A single option (or stock) position. Quantity is signed: short option
/// positions carry negative contract counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub account_id: AccountId,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub quantity: i64,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub status: PositionStatus,
    pub protocol_level: ProtocolLevel,
    pub atr_at_entry: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market P&L. Signed quantity makes this correct for both long
    /// and short positions.
    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * Decimal::from(self.quantity) * CONTRACT_MULTIPLIER
    }

    /// Strike notional securing the position (collateral for a CSP, share
    /// value covered for a CC).
    pub fn notional(&self) -> Decimal {
        self.strike * Decimal::from(self.quantity.abs()) * CONTRACT_MULTIPLIER
    }

    /// Premium collected at entry for short positions.
    pub fn opening_premium(&self) -> Decimal {
        if self.quantity < 0 {
            self.entry_price * Decimal::from(self.quantity.abs()) * CONTRACT_MULTIPLIER
        } else {
            Decimal::ZERO
        }
    }

    pub fn close(&mut self, status: PositionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}
