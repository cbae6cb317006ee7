//! In-process simulated venue. Implements the broker port faithfully
//! enough for mock mode and the integration suite: idempotent submits,
//! monotonic event sequencing, configurable fills and rejects.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::errors::ExecutionError;
use crate::domain::orders::{Order, OrderSide};
use crate::domain::positions::CONTRACT_MULTIPLIER;
use crate::domain::ports::{
    BrokerAck, BrokerAdapter, BrokerBalances, BrokerEvent, BrokerOrderState, BrokerPosition,
    ConnectionState,
};

#[derive(Debug, Clone)]
pub struct PaperBrokerConfig {
    pub initial_equity: Decimal,
    /// Fill orders automatically after `fill_delay`.
    pub auto_fill: bool,
    pub fill_delay: Duration,
    /// Symbols the venue rejects outright, for failure-path tests.
    pub reject_symbols: Vec<String>,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            initial_equity: Decimal::from(300_000),
            auto_fill: true,
            fill_delay: Duration::from_millis(20),
            reject_symbols: Vec::new(),
        }
    }
}

struct WorkingOrder {
    order: Order,
    broker_order_id: String,
    filled_quantity: i64,
    avg_fill_price: Option<Decimal>,
    open: bool,
}

struct Inner {
    connected: bool,
    seq: u64,
    orders: HashMap<String, WorkingOrder>,
    positions: HashMap<String, (i64, Decimal)>,
    cash: Decimal,
    equity: Decimal,
    marks: HashMap<String, Decimal>,
    reject_symbols: HashSet<String>,
}

pub struct PaperBroker {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<BrokerEvent>,
    config: PaperBrokerConfig,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let inner = Inner {
            connected: false,
            seq: 0,
            orders: HashMap::new(),
            positions: HashMap::new(),
            cash: config.initial_equity,
            equity: config.initial_equity,
            marks: HashMap::new(),
            reject_symbols: config.reject_symbols.iter().cloned().collect(),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            events,
            config,
        }
    }

    /// Mark price used to fill market orders for a symbol.
    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        let mut inner = self.inner.lock().expect("paper broker poisoned");
        inner.marks.insert(symbol.to_string(), price);
    }

    /// Seed a broker-side position, for reconciliation tests.
    pub fn seed_position(&self, symbol: &str, quantity: i64, avg_price: Decimal) {
        let mut inner = self.inner.lock().expect("paper broker poisoned");
        inner.positions.insert(symbol.to_string(), (quantity, avg_price));
    }

    /// Drop and re-establish the connection, emitting the events a real
    /// adapter would.
    pub fn reconnect(&self) {
        let (down, up) = {
            let mut inner = self.inner.lock().expect("paper broker poisoned");
            inner.seq += 1;
            let down = BrokerEvent::Connection {
                seq: inner.seq,
                state: ConnectionState::Disconnected,
            };
            inner.seq += 1;
            let up = BrokerEvent::Connection {
                seq: inner.seq,
                state: ConnectionState::Connected,
            };
            (down, up)
        };
        let _ = self.events.send(down);
        let _ = self.events.send(up);
    }

    fn emit(&self, make: impl FnOnce(u64) -> BrokerEvent) {
        let event = {
            let mut inner = self.inner.lock().expect("paper broker poisoned");
            inner.seq += 1;
            make(inner.seq)
        };
        let _ = self.events.send(event);
    }

    fn schedule_fill(&self, client_order_id: String) {
        let inner = self.inner.clone();
        let events = self.events.clone();
        let delay = self.config.fill_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let event = {
                let mut inner = inner.lock().expect("paper broker poisoned");
                let Some(working) = inner.orders.get(&client_order_id) else {
                    return;
                };
                if !working.open {
                    return;
                }
                let order = working.order.clone();
                let price = order
                    .limit_price
                    .or_else(|| inner.marks.get(&order.symbol).copied())
                    .unwrap_or(Decimal::ONE);
                let quantity = order.quantity;

                let working = inner.orders.get_mut(&client_order_id).expect("checked");
                working.filled_quantity = quantity;
                working.avg_fill_price = Some(price);
                working.open = false;

                let signed = match order.side {
                    OrderSide::Buy => quantity,
                    OrderSide::Sell => -quantity,
                };
                let entry = inner.positions.entry(order.symbol.clone()).or_insert((0, price));
                entry.0 += signed;
                entry.1 = price;
                let notional = price * Decimal::from(quantity) * CONTRACT_MULTIPLIER;
                match order.side {
                    OrderSide::Buy => inner.cash -= notional,
                    OrderSide::Sell => inner.cash += notional,
                }

                inner.seq += 1;
                BrokerEvent::OrderFill {
                    seq: inner.seq,
                    client_order_id: client_order_id.clone(),
                    quantity,
                    price,
                    full: true,
                }
            };
            let _ = events.send(event);
        });
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn connect(&self) -> Result<(), ExecutionError> {
        {
            let mut inner = self.inner.lock().expect("paper broker poisoned");
            inner.connected = true;
        }
        info!("PaperBroker: connected");
        self.emit(|seq| BrokerEvent::Connection {
            seq,
            state: ConnectionState::Connected,
        });
        self.emit(|seq| BrokerEvent::Heartbeat { seq });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExecutionError> {
        {
            let mut inner = self.inner.lock().expect("paper broker poisoned");
            inner.connected = false;
        }
        self.emit(|seq| BrokerEvent::Connection {
            seq,
            state: ConnectionState::Disconnected,
        });
        Ok(())
    }

    async fn submit_order(&self, order: &Order) -> Result<BrokerAck, ExecutionError> {
        let id = order.client_order_id.clone();
        let (ack, fresh) = {
            let mut inner = self.inner.lock().expect("paper broker poisoned");
            if !inner.connected {
                return Err(ExecutionError::Disconnected {
                    reason: "paper broker offline".to_string(),
                });
            }
            if inner.reject_symbols.contains(&order.symbol) {
                return Err(ExecutionError::BrokerReject {
                    client_order_id: id,
                    reason: format!("{} not tradable at this venue", order.symbol),
                });
            }
            // Idempotent by client-order-id: a resubmit returns the same ack.
            if let Some(existing) = inner.orders.get(&id) {
                (
                    BrokerAck {
                        client_order_id: id.clone(),
                        broker_order_id: existing.broker_order_id.clone(),
                    },
                    false,
                )
            } else {
                let broker_order_id = format!("pb-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
                inner.orders.insert(
                    id.clone(),
                    WorkingOrder {
                        order: order.clone(),
                        broker_order_id: broker_order_id.clone(),
                        filled_quantity: 0,
                        avg_fill_price: None,
                        open: true,
                    },
                );
                (
                    BrokerAck {
                        client_order_id: id.clone(),
                        broker_order_id,
                    },
                    true,
                )
            }
        };

        if fresh {
            debug!("PaperBroker: accepted {}", ack.client_order_id);
            let ack_clone = ack.clone();
            self.emit(move |seq| BrokerEvent::OrderAck {
                seq,
                client_order_id: ack_clone.client_order_id,
                broker_order_id: ack_clone.broker_order_id,
            });
            if self.config.auto_fill {
                self.schedule_fill(ack.client_order_id.clone());
            }
        }
        Ok(ack)
    }

    async fn cancel_order(&self, client_order_id: &str) -> Result<(), ExecutionError> {
        let found = {
            let mut inner = self.inner.lock().expect("paper broker poisoned");
            match inner.orders.get_mut(client_order_id) {
                Some(working) if working.open => {
                    working.open = false;
                    true
                }
                Some(_) => false,
                None => {
                    return Err(ExecutionError::UnknownOrder {
                        client_order_id: client_order_id.to_string(),
                    });
                }
            }
        };
        if found {
            let id = client_order_id.to_string();
            self.emit(move |seq| BrokerEvent::CancelAck {
                seq,
                client_order_id: id,
            });
        }
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, ExecutionError> {
        let inner = self.inner.lock().expect("paper broker poisoned");
        Ok(inner
            .positions
            .iter()
            .filter(|(_, (qty, _))| *qty != 0)
            .map(|(symbol, (quantity, avg_price))| BrokerPosition {
                symbol: symbol.clone(),
                quantity: *quantity,
                avg_price: *avg_price,
            })
            .collect())
    }

    async fn balances(&self) -> Result<BrokerBalances, ExecutionError> {
        let inner = self.inner.lock().expect("paper broker poisoned");
        Ok(BrokerBalances {
            cash: inner.cash,
            equity: inner.equity,
        })
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrderState>, ExecutionError> {
        let inner = self.inner.lock().expect("paper broker poisoned");
        Ok(inner
            .orders
            .iter()
            .map(|(id, working)| BrokerOrderState {
                client_order_id: id.clone(),
                broker_order_id: working.broker_order_id.clone(),
                filled_quantity: working.filled_quantity,
                avg_fill_price: working.avg_fill_price,
                open: working.open,
            })
            .collect())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::{OrderRequest, OrderType, TimeInForce};
    use crate::domain::types::AccountId;
    use rust_decimal_macros::dec;

    fn order(id: &str, symbol: &str) -> Order {
        Order::from_request(
            OrderRequest {
                client_order_id: id.to_string(),
                account_id: AccountId::generate(),
                position_id: None,
                symbol: symbol.to_string(),
                side: OrderSide::Sell,
                order_type: OrderType::Limit,
                quantity: 5,
                limit_price: Some(dec!(2.50)),
                stop_price: None,
                time_in_force: TimeInForce::Day,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn submit_is_idempotent() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            auto_fill: false,
            ..Default::default()
        });
        broker.connect().await.unwrap();

        let first = broker.submit_order(&order("ord-1", "SPY")).await.unwrap();
        let second = broker.submit_order(&order("ord-1", "SPY")).await.unwrap();
        assert_eq!(first.broker_order_id, second.broker_order_id);
        assert_eq!(broker.open_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auto_fill_emits_a_full_fill() {
        let broker = PaperBroker::new(PaperBrokerConfig::default());
        broker.connect().await.unwrap();
        let mut events = broker.subscribe_events();

        broker.submit_order(&order("ord-1", "SPY")).await.unwrap();

        let mut saw_fill = false;
        for _ in 0..8 {
            match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
                Ok(Ok(BrokerEvent::OrderFill { client_order_id, full, price, .. })) => {
                    assert_eq!(client_order_id, "ord-1");
                    assert!(full);
                    assert_eq!(price, dec!(2.50));
                    saw_fill = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_fill);
    }

    #[tokio::test]
    async fn event_sequences_are_monotonic() {
        let broker = PaperBroker::new(PaperBrokerConfig::default());
        let mut events = broker.subscribe_events();
        broker.connect().await.unwrap();
        broker.submit_order(&order("ord-1", "SPY")).await.unwrap();

        let mut last = 0;
        for _ in 0..4 {
            if let Ok(Ok(event)) =
                tokio::time::timeout(Duration::from_millis(500), events.recv()).await
            {
                let seq = match event {
                    BrokerEvent::Connection { seq, .. }
                    | BrokerEvent::OrderAck { seq, .. }
                    | BrokerEvent::OrderFill { seq, .. }
                    | BrokerEvent::OrderReject { seq, .. }
                    | BrokerEvent::CancelAck { seq, .. }
                    | BrokerEvent::AccountUpdate { seq, .. }
                    | BrokerEvent::Heartbeat { seq } => seq,
                };
                assert!(seq > last, "sequence regressed: {seq} after {last}");
                last = seq;
            }
        }
        assert!(last >= 3);
    }

    #[tokio::test]
    async fn reject_list_refuses_symbols() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            reject_symbols: vec!["GME".to_string()],
            ..Default::default()
        });
        broker.connect().await.unwrap();
        let err = broker.submit_order(&order("ord-1", "GME")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::BrokerReject { .. }));
    }

    #[tokio::test]
    async fn cancel_closes_the_working_order() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            auto_fill: false,
            ..Default::default()
        });
        broker.connect().await.unwrap();
        broker.submit_order(&order("ord-1", "SPY")).await.unwrap();
        broker.cancel_order("ord-1").await.unwrap();
        let open = broker.open_orders().await.unwrap();
        assert!(!open[0].open);
        assert!(broker.cancel_order("missing").await.is_err());
    }
}
