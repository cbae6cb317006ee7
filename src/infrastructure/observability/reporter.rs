//! Push-based metrics reporter. Polls the orchestrator's snapshot surface
//! on an interval, updates the Prometheus registry, and emits a structured
//! JSON line to stdout for log collectors. Send-only; no listener.

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::application::system::SystemHandle;
use crate::domain::audit::AuditFilter;
use crate::domain::types::HealthStatus;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
struct Snapshot {
    timestamp: String,
    uptime_seconds: u64,
    version: String,
    posture: String,
    overall: String,
    accounts: Vec<AccountLine>,
    open_positions: usize,
    open_orders: usize,
    audit_flushed_through: i64,
}

#[derive(Serialize)]
struct AccountLine {
    sleeve: String,
    state: String,
    current_value: f64,
    reserved: f64,
}

pub struct MetricsReporter {
    handle: SystemHandle,
    metrics: Metrics,
    interval: Duration,
    start: Instant,
    last_audit_seq: i64,
}

impl MetricsReporter {
    pub fn new(handle: SystemHandle, metrics: Metrics, interval: Duration) -> Self {
        Self {
            handle,
            metrics,
            interval,
            start: Instant::now(),
            last_audit_seq: 0,
        }
    }

    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            self.report().await;
        }
    }

    async fn report(&mut self) {
        let status = self.handle.status().await;
        let accounts = self.handle.snapshot_accounts().await;

        self.metrics.uptime_seconds.set(self.start.elapsed().as_secs_f64());
        self.metrics.open_positions.set(status.open_positions as f64);
        self.metrics.open_orders.set(status.open_orders as f64);
        self.metrics.health_status.set(match status.overall {
            HealthStatus::Healthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Error => 2.0,
        });

        let mut lines = Vec::new();
        for account in &accounts {
            let sleeve = account.sleeve.to_string();
            let value = account.current_value.to_f64().unwrap_or(0.0);
            let reserved = account.reserved_capital.to_f64().unwrap_or(0.0);
            self.metrics
                .account_value_usd
                .with_label_values(&[&sleeve])
                .set(value);
            self.metrics
                .reserved_capital_usd
                .with_label_values(&[&sleeve])
                .set(reserved);
            lines.push(AccountLine {
                sleeve,
                state: account.state.to_string(),
                current_value: value,
                reserved,
            });
        }

        // New audit records since the last report feed the kind counters.
        let filter = AuditFilter {
            since_seq: Some(self.last_audit_seq + 1),
            ..AuditFilter::default()
        };
        match self.handle.query_audit(&filter, 1000).await {
            Ok(records) => {
                for record in &records {
                    self.metrics
                        .audit_records_total
                        .with_label_values(&[record.event.kind.as_str()])
                        .inc();
                    if record.event.kind == crate::domain::audit::AuditKind::RuleEvaluation
                        && let Some(verdict) =
                            record.event.payload.get("verdict").and_then(|v| v.as_str())
                    {
                        self.metrics
                            .rule_evaluations_total
                            .with_label_values(&[verdict])
                            .inc();
                    }
                    self.last_audit_seq = self.last_audit_seq.max(record.seq);
                }
            }
            Err(e) => warn!("MetricsReporter: audit query failed: {}", e),
        }

        let snapshot = Snapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            posture: status.posture.to_string(),
            overall: status.overall.to_string(),
            accounts: lines,
            open_positions: status.open_positions,
            open_orders: status.open_orders,
            audit_flushed_through: status.audit_flushed_through,
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => println!("METRICS_JSON:{json}"),
            Err(e) => warn!("MetricsReporter: serialization failed: {}", e),
        }
    }
}
