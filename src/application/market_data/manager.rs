//! Multi-source quote distribution with freshness monitoring and failover.
//! One feed task per symbol owns that symbol's latest-quote snapshot; a stale
//! feed is demoted with a `FeedDegraded` audit record and the next source
//! takes over.

use chrono::{DateTime, NaiveTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::market::{MarketAlert, MarketQuote};
use crate::domain::ports::QuoteSource;
use crate::application::market_data::metrics::{AlertThresholds, SymbolMetrics};
use crate::infrastructure::persistence::audit_log::AuditLog;

/// Staleness thresholds: tight during market hours, relaxed otherwise.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub market_hours: Duration,
    pub off_hours: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            market_open: NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
            market_close: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            market_hours: Duration::from_secs(5),
            off_hours: Duration::from_secs(300),
        }
    }
}

impl FreshnessPolicy {
    pub fn threshold_at(&self, now: DateTime<Utc>) -> Duration {
        let t = now.time();
        if t >= self.market_open && t <= self.market_close {
            self.market_hours
        } else {
            self.off_hours
        }
    }
}

/// A per-symbol quote subscription that surfaces drop-oldest overflow as a
/// counter instead of losing it silently.
pub struct QuoteStream {
    rx: broadcast::Receiver<MarketQuote>,
    drops: Arc<AtomicU64>,
}

impl QuoteStream {
    pub async fn recv(&mut self) -> Option<MarketQuote> {
        loop {
            match self.rx.recv().await {
                Ok(quote) => return Some(quote),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Stale quotes are worthless; count them and move on.
                    self.drops.fetch_add(missed, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct MarketDataManager {
    latest: HashMap<String, watch::Receiver<Option<MarketQuote>>>,
    quote_txs: HashMap<String, broadcast::Sender<MarketQuote>>,
    drops: HashMap<String, Arc<AtomicU64>>,
    alert_tx: broadcast::Sender<MarketAlert>,
}

impl MarketDataManager {
    /// Spawn one feed task per symbol and return the handle consumers share.
    pub fn start(
        sources: Vec<Arc<dyn QuoteSource>>,
        symbols: Vec<String>,
        avg_daily_volumes: HashMap<String, i64>,
        thresholds: AlertThresholds,
        freshness: FreshnessPolicy,
        audit: AuditLog,
        queue_capacity: usize,
    ) -> Self {
        let (alert_tx, _) = broadcast::channel(queue_capacity);

        let mut latest = HashMap::new();
        let mut quote_txs = HashMap::new();
        let mut drops = HashMap::new();

        for symbol in symbols {
            let (watch_tx, watch_rx) = watch::channel(None);
            let (quote_tx, _) = broadcast::channel(queue_capacity);
            latest.insert(symbol.clone(), watch_rx);
            quote_txs.insert(symbol.clone(), quote_tx.clone());
            drops.insert(symbol.clone(), Arc::new(AtomicU64::new(0)));

            let adv = avg_daily_volumes.get(&symbol).copied().unwrap_or(0);
            let task = FeedTask {
                symbol,
                sources: sources.clone(),
                watch_tx,
                quote_tx,
                alert_tx: alert_tx.clone(),
                metrics_thresholds: thresholds.clone(),
                avg_daily_volume: adv,
                freshness: freshness.clone(),
                audit: audit.clone(),
            };
            tokio::spawn(task.run());
        }

        Self {
            latest,
            quote_txs,
            drops,
            alert_tx,
        }
    }

    /// Latest-quote snapshot for a symbol. Readers only ever see values at
    /// least as new as their previous read.
    pub fn latest(&self, symbol: &str) -> Option<watch::Receiver<Option<MarketQuote>>> {
        self.latest.get(symbol).cloned()
    }

    pub fn subscribe_quotes(&self, symbol: &str) -> Option<QuoteStream> {
        Some(QuoteStream {
            rx: self.quote_txs.get(symbol)?.subscribe(),
            drops: self.drops.get(symbol)?.clone(),
        })
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<MarketAlert> {
        self.alert_tx.subscribe()
    }

    pub fn drop_count(&self, symbol: &str) -> u64 {
        self.drops
            .get(symbol)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Age of the freshest quote for a symbol, for health probes.
    pub fn quote_age(&self, symbol: &str, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.latest
            .get(symbol)
            .and_then(|rx| rx.borrow().as_ref().map(|q| now - q.ts))
    }

    pub fn symbols(&self) -> Vec<String> {
        self.latest.keys().cloned().collect()
    }
}

struct FeedTask {
    symbol: String,
    sources: Vec<Arc<dyn QuoteSource>>,
    watch_tx: watch::Sender<Option<MarketQuote>>,
    quote_tx: broadcast::Sender<MarketQuote>,
    alert_tx: broadcast::Sender<MarketAlert>,
    metrics_thresholds: AlertThresholds,
    avg_daily_volume: i64,
    freshness: FreshnessPolicy,
    audit: AuditLog,
}

impl FeedTask {
    async fn run(self) {
        let mut metrics = SymbolMetrics::new(
            self.symbol.clone(),
            self.avg_daily_volume,
            self.metrics_thresholds.clone(),
        );
        let mut source_index = 0usize;

        'sources: loop {
            if self.sources.is_empty() {
                warn!("FeedTask[{}]: no quote sources configured", self.symbol);
                return;
            }
            let source = &self.sources[source_index % self.sources.len()];
            let mut rx = match source.subscribe(std::slice::from_ref(&self.symbol)).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(
                        "FeedTask[{}]: subscribe to {} failed: {}",
                        self.symbol,
                        source.name(),
                        e
                    );
                    self.degrade(source.name(), "subscribe failed").await;
                    source_index += 1;
                    continue;
                }
            };
            info!("FeedTask[{}]: feeding from {}", self.symbol, source.name());

            loop {
                let threshold = self.freshness.threshold_at(Utc::now());
                match timeout(threshold, rx.recv()).await {
                    Ok(Some(quote)) => {
                        if quote.symbol != self.symbol {
                            continue;
                        }
                        // Per-symbol timestamps are monotonic; drop regressions.
                        let stale = self
                            .watch_tx
                            .borrow()
                            .as_ref()
                            .is_some_and(|prev| quote.ts < prev.ts);
                        if stale {
                            continue;
                        }

                        for alert in metrics.observe(&quote) {
                            let _ = self.alert_tx.send(alert.clone());
                            let event = AuditEvent::new(AuditKind::MarketAlert, "market_data")
                                .with_subject(self.symbol.clone())
                                .with_payload(json!({
                                    "kind": alert.kind.to_string(),
                                    "message": alert.message,
                                }));
                            if let Err(e) = self.audit.append(event).await {
                                warn!("FeedTask[{}]: alert audit failed: {}", self.symbol, e);
                            }
                        }

                        let _ = self.watch_tx.send(Some(quote.clone()));
                        let _ = self.quote_tx.send(quote);
                    }
                    Ok(None) => {
                        warn!(
                            "FeedTask[{}]: stream from {} ended",
                            self.symbol,
                            source.name()
                        );
                        self.degrade(source.name(), "stream ended").await;
                        source_index += 1;
                        continue 'sources;
                    }
                    Err(_) => {
                        warn!(
                            "FeedTask[{}]: {} stale beyond {:?}, failing over",
                            self.symbol,
                            source.name(),
                            threshold
                        );
                        self.degrade(source.name(), "freshness threshold exceeded").await;
                        source_index += 1;
                        continue 'sources;
                    }
                }
            }
        }
    }

    async fn degrade(&self, source: &str, reason: &str) {
        let event = AuditEvent::new(AuditKind::FeedDegraded, "market_data")
            .with_subject(self.symbol.clone())
            .with_payload(json!({ "source": source, "reason": reason }));
        if let Err(e) = self.audit.append(event).await {
            warn!("FeedTask[{}]: degrade audit failed: {}", self.symbol, e);
        }
    }
}
