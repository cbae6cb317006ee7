//! The Execution Engine: order intake with idempotency and backpressure,
//! pre-trade validation through the Rules Engine, slicing, rate-limited
//! venue dispatch, fill application, and timeout-driven auto-cancel.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::execution::reconciler;
use crate::application::execution::slicer::slice_order;
use crate::application::execution::throttler::DispatchThrottler;
use crate::application::health::HealthRegistry;
use crate::application::rules_engine::RulesEngine;
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::constitution::capital;
use crate::domain::errors::ExecutionError;
use crate::domain::orders::{Order, OrderRequest, OrderStatus};
use crate::domain::ports::{BrokerAdapter, BrokerEvent, ConnectionState};
use crate::domain::rules::ProposedAction;
use crate::domain::types::AccountId;
use crate::infrastructure::persistence::audit_log::AuditLog;

const ACTOR: &str = "execution";

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub submit_queue_depth: usize,
    pub max_orders_per_minute: u32,
    pub order_submit_timeout: Duration,
    /// SUBMITTED/PARTIALLY_FILLED orders older than this are auto-cancelled.
    pub order_fill_deadline: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            submit_queue_depth: 64,
            max_orders_per_minute: 30,
            order_submit_timeout: Duration::from_secs(10),
            order_fill_deadline: Duration::from_secs(300),
        }
    }
}

/// Events toward the orchestrator for booking and escalation handling.
/// Sliced child orders roll up into their parent; only top-level orders
/// are reported here.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Filled { order: Order },
    PartiallyFilled { order: Order },
    Rejected { order: Order },
    Cancelled { order: Order },
    Errored { order: Order, reason: String },
}

struct SubmitMsg {
    request: OrderRequest,
    action: ProposedAction,
    reply: oneshot::Sender<Result<Order, ExecutionError>>,
}

type OrderBook = Arc<RwLock<HashMap<String, Order>>>;

#[derive(Clone)]
pub struct ExecutionHandle {
    submit_tx: mpsc::Sender<SubmitMsg>,
    orders: OrderBook,
    broker: Arc<dyn BrokerAdapter>,
}

impl ExecutionHandle {
    /// Submit an order. A full intake queue refuses with `Backpressure`
    /// rather than silently dropping; a duplicate client-order-id returns
    /// the existing order without creating anything.
    pub async fn submit(
        &self,
        request: OrderRequest,
        action: ProposedAction,
    ) -> Result<Order, ExecutionError> {
        let (reply, rx) = oneshot::channel();
        self.submit_tx
            .try_send(SubmitMsg {
                request,
                action,
                reply,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => ExecutionError::Backpressure {
                    capacity: self.submit_tx.max_capacity(),
                },
                TrySendError::Closed(_) => ExecutionError::Disconnected {
                    reason: "execution engine stopped".to_string(),
                },
            })?;
        rx.await.map_err(|_| ExecutionError::Disconnected {
            reason: "execution engine stopped".to_string(),
        })?
    }

    pub async fn order(&self, client_order_id: &str) -> Option<Order> {
        self.orders.read().await.get(client_order_id).cloned()
    }

    pub async fn orders_snapshot(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn cancel(&self, client_order_id: &str) -> Result<(), ExecutionError> {
        self.broker.cancel_order(client_order_id).await
    }
}

pub struct ExecutionEngine;

impl ExecutionEngine {
    /// Wire up and spawn the dispatcher, throttler, venue submitter, broker
    /// event pump, and timeout watchdog.
    pub fn start(
        rules: Arc<RulesEngine>,
        broker: Arc<dyn BrokerAdapter>,
        audit: AuditLog,
        health: Arc<HealthRegistry>,
        config: ExecutionConfig,
    ) -> (ExecutionHandle, mpsc::Receiver<ExecutionEvent>) {
        let orders: OrderBook = Arc::new(RwLock::new(HashMap::new()));
        let (submit_tx, submit_rx) = mpsc::channel(config.submit_queue_depth);
        let (throttle_tx, throttle_rx) = mpsc::channel(config.submit_queue_depth);
        let (venue_tx, venue_rx) = mpsc::channel(config.submit_queue_depth);
        let (event_tx, event_rx) = mpsc::channel(config.submit_queue_depth);

        health.register(ACTOR, Duration::from_secs(10));

        tokio::spawn(DispatchThrottler::new(throttle_rx, venue_tx, config.max_orders_per_minute).run());

        let dispatcher = Dispatcher {
            rx: submit_rx,
            orders: orders.clone(),
            rules,
            audit: audit.clone(),
            throttle_tx,
            event_tx: event_tx.clone(),
            daily: HashMap::new(),
            health: health.clone(),
        };
        tokio::spawn(dispatcher.run());

        let venue = VenueSubmitter {
            rx: venue_rx,
            orders: orders.clone(),
            broker: broker.clone(),
            audit: audit.clone(),
            event_tx: event_tx.clone(),
            submit_timeout: config.order_submit_timeout,
        };
        tokio::spawn(venue.run());

        let pump = EventPump {
            orders: orders.clone(),
            broker: broker.clone(),
            audit: audit.clone(),
            event_tx,
            health,
        };
        tokio::spawn(pump.run());

        let watchdog = Watchdog {
            orders: orders.clone(),
            broker: broker.clone(),
            audit,
            deadline: config.order_fill_deadline,
        };
        tokio::spawn(watchdog.run());

        (
            ExecutionHandle {
                submit_tx,
                orders,
                broker,
            },
            event_rx,
        )
    }
}

struct Dispatcher {
    rx: mpsc::Receiver<SubmitMsg>,
    orders: OrderBook,
    rules: Arc<RulesEngine>,
    audit: AuditLog,
    throttle_tx: mpsc::Sender<Order>,
    event_tx: mpsc::Sender<ExecutionEvent>,
    daily: HashMap<(chrono::NaiveDate, AccountId), i64>,
    health: Arc<HealthRegistry>,
}

impl Dispatcher {
    async fn run(mut self) {
        info!("Execution dispatcher started.");
        let mut beat = tokio::time::interval(Duration::from_secs(5));
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = beat.tick() => {
                    self.health.beat(ACTOR);
                }
                msg = self.rx.recv() => {
                    let Some(msg) = msg else {
                        info!("Execution dispatcher stopped.");
                        return;
                    };
                    self.health.beat(ACTOR);
                    let result = self.handle_submit(msg.request, msg.action).await;
                    let _ = msg.reply.send(result);
                }
            }
        }
    }

    async fn handle_submit(
        &mut self,
        request: OrderRequest,
        action: ProposedAction,
    ) -> Result<Order, ExecutionError> {
        let now = Utc::now();

        // Idempotency: same client-order-id returns the existing status and
        // creates nothing beyond a duplicate-detected note.
        if let Some(existing) = self.orders.read().await.get(&request.client_order_id).cloned() {
            self.audit_event(
                AuditEvent::new(AuditKind::DuplicateSubmit, ACTOR)
                    .with_subject(request.client_order_id.clone())
                    .with_payload(json!({ "status": existing.status.to_string() })),
            )
            .await;
            debug!(
                "Execution: duplicate submit of {} ({})",
                request.client_order_id, existing.status
            );
            return Ok(existing);
        }

        let mut order = Order::from_request(request.clone(), now);

        let decision = self
            .rules
            .evaluate_with_subject(&action, Some(&request.client_order_id))
            .await
            .map_err(|e| ExecutionError::Disconnected {
                reason: format!("audit unavailable: {e}"),
            })?;
        order.citations = decision.clause_refs();

        if decision.is_rejected() {
            order.transition(OrderStatus::Rejected, now)?;
            self.store_and_audit(&order, "rejected_by_rules").await;
            let _ = self
                .event_tx
                .send(ExecutionEvent::Rejected { order: order.clone() })
                .await;
            return Ok(order);
        }

        // Per-account daily contract cap.
        let cap = self.rules.constitution().capital().daily_contract_cap;
        let key = (now.date_naive(), request.account_id);
        let submitted_today = self.daily.get(&key).copied().unwrap_or(0);
        if submitted_today + request.quantity > cap {
            order.citations.push(capital::DAILY_CAP_CLAUSE.to_string());
            order.transition(OrderStatus::Rejected, now)?;
            self.store_and_audit(&order, "daily_cap_exceeded").await;
            let _ = self
                .event_tx
                .send(ExecutionEvent::Rejected { order: order.clone() })
                .await;
            return Ok(order);
        }
        self.daily.insert(key, submitted_today + request.quantity);

        order.transition(OrderStatus::Validated, now)?;

        let threshold = self.rules.constitution().capital().slice_threshold;
        let slices = slice_order(&request, threshold);
        if slices.len() == 1 {
            self.store_and_audit(&order, "validated").await;
            self.enqueue(order.clone()).await?;
            return Ok(order);
        }

        // Sliced: the parent stays as the idempotency anchor and aggregate;
        // the slices are what the venue sees.
        self.store_and_audit(&order, "validated_sliced").await;
        for slice_request in slices {
            let mut slice = Order::from_request(slice_request, now);
            slice.parent_order_id = Some(order.client_order_id.clone());
            slice.citations = order.citations.clone();
            slice.transition(OrderStatus::Validated, now)?;
            self.store_and_audit(&slice, "validated").await;
            self.enqueue(slice).await?;
        }
        Ok(order)
    }

    async fn enqueue(&self, order: Order) -> Result<(), ExecutionError> {
        self.throttle_tx
            .send(order)
            .await
            .map_err(|_| ExecutionError::Disconnected {
                reason: "dispatch pipeline stopped".to_string(),
            })
    }

    async fn store_and_audit(&self, order: &Order, note: &str) {
        self.orders
            .write()
            .await
            .insert(order.client_order_id.clone(), order.clone());
        let mut event = AuditEvent::new(AuditKind::OrderEvent, ACTOR)
            .with_subject(order.client_order_id.clone())
            .with_payload(json!({
                "note": note,
                "status": order.status.to_string(),
                "symbol": order.symbol,
                "quantity": order.quantity,
            }));
        for clause in &order.citations {
            event = event.with_clause(clause.clone());
        }
        self.audit_event(event).await;
    }

    async fn audit_event(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(event).await {
            error!("Execution: audit append failed: {}", e);
        }
    }
}

struct VenueSubmitter {
    rx: mpsc::Receiver<Order>,
    orders: OrderBook,
    broker: Arc<dyn BrokerAdapter>,
    audit: AuditLog,
    event_tx: mpsc::Sender<ExecutionEvent>,
    submit_timeout: Duration,
}

impl VenueSubmitter {
    async fn run(mut self) {
        while let Some(order) = self.rx.recv().await {
            self.submit_one(order).await;
        }
    }

    async fn submit_one(&self, order: Order) {
        let id = order.client_order_id.clone();

        // One retry on timeout, then the order errors out.
        let mut attempt = 0;
        let ack = loop {
            attempt += 1;
            match timeout(self.submit_timeout, self.broker.submit_order(&order)).await {
                Ok(Ok(ack)) => break Ok(ack),
                Ok(Err(e)) => break Err(e),
                Err(_) if attempt < 2 => {
                    warn!("Execution: submit of {} timed out, retrying", id);
                    continue;
                }
                Err(_) => {
                    break Err(ExecutionError::Timeout {
                        what: format!("submit of {id}"),
                        deadline_ms: self.submit_timeout.as_millis() as u64,
                    });
                }
            }
        };

        let now = Utc::now();
        let mut orders = self.orders.write().await;
        match ack {
            Ok(ack) => {
                if let Some(stored) = orders.get_mut(&id) {
                    stored.broker_order_id = Some(ack.broker_order_id.clone());
                    if stored.status == OrderStatus::Validated
                        && let Err(e) = stored.transition(OrderStatus::Submitted, now)
                    {
                        warn!("Execution: {}", e);
                    }
                    // A slice's submission also arms its parent aggregate.
                    if let Some(parent_id) = stored.parent_order_id.clone()
                        && let Some(parent) = orders.get_mut(&parent_id)
                        && parent.status == OrderStatus::Validated
                    {
                        let _ = parent.transition(OrderStatus::Submitted, now);
                    }
                }
                drop(orders);
                self.audit(
                    AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                        .with_subject(id)
                        .with_payload(json!({ "note": "submitted", "broker_order_id": ack.broker_order_id })),
                )
                .await;
            }
            Err(e) => {
                let errored = if let Some(stored) = orders.get_mut(&id) {
                    let _ = stored.transition(OrderStatus::Error, now);
                    Some(stored.clone())
                } else {
                    None
                };
                drop(orders);
                error!("Execution: submit of {} failed: {}", id, e);
                self.audit(
                    AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                        .with_subject(id)
                        .with_payload(json!({ "note": "submit_failed", "error": e.to_string() })),
                )
                .await;
                if let Some(order) = errored {
                    let _ = self
                        .event_tx
                        .send(ExecutionEvent::Errored {
                            order,
                            reason: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(event).await {
            error!("Execution: audit append failed: {}", e);
        }
    }
}

struct EventPump {
    orders: OrderBook,
    broker: Arc<dyn BrokerAdapter>,
    audit: AuditLog,
    event_tx: mpsc::Sender<ExecutionEvent>,
    health: Arc<HealthRegistry>,
}

impl EventPump {
    async fn run(self) {
        let mut events = self.broker.subscribe_events();
        let mut seen_connected = false;
        info!("Execution event pump started.");

        loop {
            match events.recv().await {
                Ok(event) => {
                    self.health.beat(ACTOR);
                    self.apply(event, &mut seen_connected).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Execution: broker event stream lagged by {}", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("Execution: broker event stream closed.");
                    return;
                }
            }
        }
    }

    async fn apply(&self, event: BrokerEvent, seen_connected: &mut bool) {
        let now = Utc::now();
        match event {
            BrokerEvent::Connection { state, .. } => {
                if state == ConnectionState::Connected {
                    // Reconcile on every re-establishment after the first.
                    if *seen_connected
                        && let Err(e) =
                            reconciler::reconcile_orders(&self.orders, &self.broker, &self.audit).await
                    {
                        warn!("Execution: reconnect reconciliation failed: {}", e);
                    }
                    *seen_connected = true;
                }
            }
            BrokerEvent::OrderAck {
                client_order_id,
                broker_order_id,
                ..
            } => {
                let mut orders = self.orders.write().await;
                if let Some(order) = orders.get_mut(&client_order_id) {
                    order.broker_order_id = Some(broker_order_id);
                    if order.status == OrderStatus::Validated {
                        let _ = order.transition(OrderStatus::Submitted, now);
                    }
                }
            }
            BrokerEvent::OrderFill {
                client_order_id,
                quantity,
                price,
                ..
            } => {
                let (updated, parent_updated) = {
                    let mut orders = self.orders.write().await;
                    let Some(order) = orders.get_mut(&client_order_id) else {
                        warn!("Execution: fill for unknown order {}", client_order_id);
                        return;
                    };
                    if let Err(e) = order.apply_fill(quantity, price, now) {
                        error!("Execution: {}", e);
                        return;
                    }
                    let updated = order.clone();

                    let parent_updated = if let Some(parent_id) = updated.parent_order_id.clone() {
                        orders.get_mut(&parent_id).map(|parent| {
                            // A slice fill can land before the parent saw its
                            // own ack; arm the aggregate first.
                            if parent.status == OrderStatus::Validated {
                                let _ = parent.transition(OrderStatus::Submitted, now);
                            }
                            if let Err(e) = parent.apply_fill(quantity, price, now) {
                                error!("Execution: parent aggregate: {}", e);
                            }
                            parent.clone()
                        })
                    } else {
                        None
                    };
                    (updated, parent_updated)
                };

                self.audit(
                    AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                        .with_subject(updated.client_order_id.clone())
                        .with_payload(json!({
                            "note": "fill",
                            "quantity": quantity,
                            "price": price.to_string(),
                            "status": updated.status.to_string(),
                        })),
                )
                .await;

                // Report top-level orders only; slices roll up.
                let report = parent_updated.unwrap_or(updated);
                if report.parent_order_id.is_none() {
                    let event = if report.status == OrderStatus::Filled {
                        ExecutionEvent::Filled { order: report }
                    } else {
                        ExecutionEvent::PartiallyFilled { order: report }
                    };
                    let _ = self.event_tx.send(event).await;
                }
            }
            BrokerEvent::OrderReject {
                client_order_id,
                reason,
                ..
            } => {
                let errored = {
                    let mut orders = self.orders.write().await;
                    orders.get_mut(&client_order_id).map(|order| {
                        let _ = order.transition(OrderStatus::Error, now);
                        order.clone()
                    })
                };
                self.audit(
                    AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                        .with_subject(client_order_id.clone())
                        .with_payload(json!({ "note": "broker_reject", "reason": reason })),
                )
                .await;
                if let Some(order) = errored
                    && order.parent_order_id.is_none()
                {
                    let _ = self
                        .event_tx
                        .send(ExecutionEvent::Errored { order, reason })
                        .await;
                }
            }
            BrokerEvent::CancelAck { client_order_id, .. } => {
                let cancelled = {
                    let mut orders = self.orders.write().await;
                    orders.get_mut(&client_order_id).map(|order| {
                        let _ = order.transition(OrderStatus::Cancelled, now);
                        order.clone()
                    })
                };
                self.audit(
                    AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                        .with_subject(client_order_id)
                        .with_payload(json!({ "note": "cancelled" })),
                )
                .await;
                if let Some(order) = cancelled
                    && order.parent_order_id.is_none()
                {
                    let _ = self.event_tx.send(ExecutionEvent::Cancelled { order }).await;
                }
            }
            BrokerEvent::AccountUpdate { .. } | BrokerEvent::Heartbeat { .. } => {}
        }
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(event).await {
            error!("Execution: audit append failed: {}", e);
        }
    }
}

struct Watchdog {
    orders: OrderBook,
    broker: Arc<dyn BrokerAdapter>,
    audit: AuditLog,
    deadline: Duration,
}

impl Watchdog {
    async fn run(self) {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let now = Utc::now();
            let deadline = chrono::Duration::from_std(self.deadline).unwrap_or(chrono::Duration::MAX);

            let overdue: Vec<String> = {
                let orders = self.orders.read().await;
                orders
                    .values()
                    .filter(|o| {
                        matches!(
                            o.status,
                            OrderStatus::Submitted | OrderStatus::PartiallyFilled
                        ) && o.submitted_at.is_some_and(|at| now - at > deadline)
                    })
                    .map(|o| o.client_order_id.clone())
                    .collect()
            };

            for id in overdue {
                warn!("Execution: order {} exceeded fill deadline, cancelling", id);
                if let Err(e) = self.broker.cancel_order(&id).await {
                    error!("Execution: auto-cancel of {} failed: {}", id, e);
                    continue;
                }
                if let Err(e) = self
                    .audit
                    .append(
                        AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                            .with_subject(id)
                            .with_payload(json!({ "note": "auto_cancel_timeout" })),
                    )
                    .await
                {
                    error!("Execution: audit append failed: {}", e);
                }
            }
        }
    }
}
