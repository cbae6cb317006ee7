//! Order-book reconciliation against the broker, run on startup and on
//! every connection re-establishment. Broker truth is preferred; every
//! divergence leaves a `reconciliation` audit record.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::errors::ExecutionError;
use crate::domain::orders::{Order, OrderStatus};
use crate::domain::ports::BrokerAdapter;
use crate::infrastructure::persistence::audit_log::AuditLog;

const ACTOR: &str = "execution";

/// Returns the number of divergences resolved.
pub async fn reconcile_orders(
    orders: &Arc<RwLock<HashMap<String, Order>>>,
    broker: &Arc<dyn BrokerAdapter>,
    audit: &AuditLog,
) -> Result<usize, ExecutionError> {
    let broker_orders = broker.open_orders().await?;
    let broker_by_id: HashMap<&str, _> = broker_orders
        .iter()
        .map(|o| (o.client_order_id.as_str(), o))
        .collect();

    let now = Utc::now();
    let mut divergences = 0usize;
    let mut records = Vec::new();

    {
        let mut book = orders.write().await;
        for order in book.values_mut().filter(|o| !o.status.is_terminal()) {
            match broker_by_id.get(order.client_order_id.as_str()) {
                Some(broker_state) => {
                    // Broker has seen more fills than we booked: take them.
                    if broker_state.filled_quantity > order.filled_quantity {
                        let missing = broker_state.filled_quantity - order.filled_quantity;
                        let price = broker_state
                            .avg_fill_price
                            .or(order.limit_price)
                            .unwrap_or_default();
                        if let Err(e) = order.apply_fill(missing, price, now) {
                            warn!("Reconciler: cannot apply broker fills to {}: {}", order.client_order_id, e);
                        } else {
                            divergences += 1;
                            records.push((order.client_order_id.clone(), "missed_fills", missing));
                        }
                    }
                    // Broker closed it without a full fill: it is gone.
                    if !broker_state.open && !order.status.is_terminal() {
                        let _ = order.transition(OrderStatus::Cancelled, now);
                        divergences += 1;
                        records.push((order.client_order_id.clone(), "closed_at_broker", 0));
                    }
                }
                None => {
                    // In flight on our side but unknown to the broker.
                    if matches!(
                        order.status,
                        OrderStatus::Submitted | OrderStatus::PartiallyFilled
                    ) {
                        let _ = order.transition(OrderStatus::Error, now);
                        divergences += 1;
                        records.push((order.client_order_id.clone(), "unknown_at_broker", 0));
                    }
                }
            }
        }

        for broker_state in &broker_orders {
            if broker_state.open && !book.contains_key(&broker_state.client_order_id) {
                divergences += 1;
                records.push((broker_state.client_order_id.clone(), "foreign_order", 0));
            }
        }
    }

    for (subject, note, quantity) in records {
        if let Err(e) = audit
            .append(
                AuditEvent::new(AuditKind::Reconciliation, ACTOR)
                    .with_subject(subject)
                    .with_payload(json!({ "note": note, "quantity": quantity })),
            )
            .await
        {
            warn!("Reconciler: audit append failed: {}", e);
        }
    }

    if divergences > 0 {
        info!("Reconciler: resolved {} order divergences", divergences);
    }
    Ok(divergences)
}
