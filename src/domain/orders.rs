use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::ExecutionError;
use crate::domain::types::{AccountId, PositionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingValidation,
    Validated,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Error,
}

impl OrderStatus {
    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Error
        )
    }

    pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if from.is_terminal() {
            return false;
        }
        // Any pre-terminal order may fall to ERROR on a venue failure.
        if to == Error {
            return true;
        }
        matches!(
            (from, to),
            (PendingValidation, Validated)
                | (PendingValidation, Rejected)
                | (Validated, Submitted)
                | (Validated, Cancelled)
                | (Submitted, PartiallyFilled)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::PendingValidation => "PENDING_VALIDATION",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// What a caller hands the Execution Engine. `client_order_id` is the stable
/// idempotency key; resubmitting the same id returns the existing status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub account_id: AccountId,
    pub position_id: Option<PositionId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    /// Set on slices produced by splitting an oversized parent order.
    pub parent_order_id: Option<String>,
    pub account_id: AccountId,
    pub position_id: Option<PositionId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub avg_fill_price: Option<Decimal>,
    pub venue: Option<String>,
    /// Clause refs from the approving rule evaluation. Every submitted order
    /// carries at least one.
    pub citations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn from_request(request: OrderRequest, now: DateTime<Utc>) -> Self {
        Self {
            client_order_id: request.client_order_id,
            broker_order_id: None,
            parent_order_id: None,
            account_id: request.account_id,
            position_id: request.position_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            status: OrderStatus::PendingValidation,
            filled_quantity: 0,
            avg_fill_price: None,
            venue: None,
            citations: Vec::new(),
            created_at: now,
            submitted_at: None,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), ExecutionError> {
        if !OrderStatus::transition_allowed(self.status, to) {
            return Err(ExecutionError::InvalidTransition {
                client_order_id: self.client_order_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        match to {
            OrderStatus::Submitted => self.submitted_at = Some(now),
            OrderStatus::Filled => self.filled_at = Some(now),
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Book a (partial or full) fill, maintaining the volume-weighted average
    /// fill price and the filled ≤ quantity invariant.
    pub fn apply_fill(
        &mut self,
        fill_quantity: i64,
        fill_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        if fill_quantity <= 0 || self.filled_quantity + fill_quantity > self.quantity {
            return Err(ExecutionError::InvalidTransition {
                client_order_id: self.client_order_id.clone(),
                from: format!("filled {}/{}", self.filled_quantity, self.quantity),
                to: format!("fill of {fill_quantity}"),
            });
        }

        let prior_notional =
            self.avg_fill_price.unwrap_or(Decimal::ZERO) * Decimal::from(self.filled_quantity);
        self.filled_quantity += fill_quantity;
        self.avg_fill_price = Some(
            (prior_notional + fill_price * Decimal::from(fill_quantity))
                / Decimal::from(self.filled_quantity),
        );

        if self.filled_quantity == self.quantity {
            self.transition(OrderStatus::Filled, now)
        } else {
            self.transition(OrderStatus::PartiallyFilled, now)
        }
    }
}
