//! Ports to external collaborators. The core consumes these adapters; it
//! never implements a wire protocol itself.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::domain::errors::{AtrError, ExecutionError, MarketDataError};
use crate::domain::market::MarketQuote;
use crate::domain::orders::Order;
use crate::domain::types::OhlcBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Acknowledgement returned by an idempotent submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerAck {
    pub client_order_id: String,
    pub broker_order_id: String,
}

/// Position as the broker sees it, used for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerBalances {
    pub cash: Decimal,
    pub equity: Decimal,
}

/// The broker's view of one working or recently terminal order, for
/// reconciliation against the internal book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrderState {
    pub client_order_id: String,
    pub broker_order_id: String,
    pub filled_quantity: i64,
    pub avg_fill_price: Option<Decimal>,
    pub open: bool,
}

/// Events delivered by the broker connection. `seq` is monotonically
/// increasing per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerEvent {
    Connection {
        seq: u64,
        state: ConnectionState,
    },
    OrderAck {
        seq: u64,
        client_order_id: String,
        broker_order_id: String,
    },
    OrderFill {
        seq: u64,
        client_order_id: String,
        quantity: i64,
        price: Decimal,
        full: bool,
    },
    OrderReject {
        seq: u64,
        client_order_id: String,
        reason: String,
    },
    CancelAck {
        seq: u64,
        client_order_id: String,
    },
    AccountUpdate {
        seq: u64,
        balances: BrokerBalances,
    },
    Heartbeat {
        seq: u64,
    },
}

/// The broker boundary. Submit must be idempotent by client-order-id.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), ExecutionError>;
    async fn disconnect(&self) -> Result<(), ExecutionError>;
    async fn submit_order(&self, order: &Order) -> Result<BrokerAck, ExecutionError>;
    async fn cancel_order(&self, client_order_id: &str) -> Result<(), ExecutionError>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>, ExecutionError>;
    async fn balances(&self) -> Result<BrokerBalances, ExecutionError>;
    async fn open_orders(&self) -> Result<Vec<BrokerOrderState>, ExecutionError>;
    /// Event stream for this connection. Multiple subscribers allowed.
    fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent>;
}

/// Streaming quote source: one subscription delivers quotes for a symbol set.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;
    /// Source quality indicator in [0,1], used to order failover.
    fn quality(&self) -> f64;
    async fn subscribe(
        &self,
        symbols: &[String],
    ) -> Result<mpsc::Receiver<MarketQuote>, MarketDataError>;
}

/// Historical daily-bar source for ATR computation. Sources are tried in
/// order; each carries a quality score that seeds ATR confidence.
#[async_trait]
pub trait BarSource: Send + Sync {
    fn name(&self) -> &str;
    /// Base data-quality score in [0.7, 1.0].
    fn quality_score(&self) -> f64;
    async fn daily_bars(
        &self,
        symbol: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<Vec<OhlcBar>, AtrError>;
}
