//! ATR computation over ordered data-source fallbacks: fetch, validate,
//! compute, validate the result, attach a confidence score, cache with TTL.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::atr::{AtrMethod, AtrValue, atr};
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::errors::AtrError;
use crate::domain::ports::BarSource;
use crate::domain::types::OhlcBar;
use crate::infrastructure::persistence::audit_log::AuditLog;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbol: String,
    period: usize,
    method: AtrMethod,
    window_days: u32,
    as_of: NaiveDate,
}

struct CacheEntry {
    value: AtrValue,
    inserted: Instant,
}

#[derive(Debug, Clone)]
pub struct AtrRequest {
    pub symbol: String,
    pub period: usize,
    pub method: AtrMethod,
    pub window_days: u32,
    pub as_of: NaiveDate,
    /// Opt-in to the degraded-confidence fallback multiplier when every
    /// source fails.
    pub allow_fallback: bool,
}

pub struct AtrService {
    sources: Vec<Arc<dyn BarSource>>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    cache_ttl: Duration,
    fetch_timeout: Duration,
    /// Newest bar older than this on a trading day is `Stale`.
    staleness_tolerance_days: i64,
    audit: AuditLog,
}

/// Multiplier applied to the previous day's cached ATR when every source
/// fails and the caller opted into the fallback.
const FALLBACK_MULTIPLIER: Decimal = dec!(1.1);
const FALLBACK_CONFIDENCE_CAP: f64 = 0.4;

impl AtrService {
    pub fn new(
        sources: Vec<Arc<dyn BarSource>>,
        cache_ttl: Duration,
        fetch_timeout: Duration,
        audit: AuditLog,
    ) -> Self {
        Self {
            sources,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
            fetch_timeout,
            staleness_tolerance_days: 1,
            audit,
        }
    }

    pub async fn compute(&self, request: &AtrRequest) -> Result<AtrValue, AtrError> {
        let key = CacheKey {
            symbol: request.symbol.clone(),
            period: request.period,
            method: request.method,
            window_days: request.window_days,
            as_of: request.as_of,
        };

        if let Some(mut cached) = self.cache_lookup(&key) {
            cached.from_cache = true;
            debug!("AtrService: cache hit for {}", request.symbol);
            return Ok(cached);
        }

        match self.compute_fresh(request).await {
            Ok(value) => {
                self.cache_store(key, value.clone());
                Ok(value)
            }
            Err(err) if request.allow_fallback => self.fallback(request, err).await,
            Err(err) => Err(err),
        }
    }

    fn cache_lookup(&self, key: &CacheKey) -> Option<AtrValue> {
        let cache = self.cache.lock().expect("atr cache poisoned");
        cache
            .get(key)
            .filter(|entry| entry.inserted.elapsed() < self.cache_ttl)
            .map(|entry| entry.value.clone())
    }

    fn cache_store(&self, key: CacheKey, value: AtrValue) {
        let mut cache = self.cache.lock().expect("atr cache poisoned");
        cache.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Most recent successful value for the symbol regardless of as-of date,
    /// used to seed the fallback multiplier.
    fn previous_value(&self, symbol: &str) -> Option<AtrValue> {
        let cache = self.cache.lock().expect("atr cache poisoned");
        cache
            .iter()
            .filter(|(k, _)| k.symbol == symbol)
            .max_by_key(|(k, _)| k.as_of)
            .map(|(_, entry)| entry.value.clone())
    }

    async fn compute_fresh(&self, request: &AtrRequest) -> Result<AtrValue, AtrError> {
        let mut attempted = Vec::new();
        let mut last_invalid: Option<String> = None;
        let mut saw_stale: Option<AtrError> = None;

        for (index, source) in self.sources.iter().enumerate() {
            attempted.push(source.name().to_string());

            let bars = match timeout(
                self.fetch_timeout,
                source.daily_bars(&request.symbol, request.as_of, request.window_days),
            )
            .await
            {
                Ok(Ok(bars)) => bars,
                Ok(Err(e)) => {
                    warn!("AtrService: {} failed for {}: {}", source.name(), request.symbol, e);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "AtrService: {} timed out after {:?} for {}",
                        source.name(),
                        self.fetch_timeout,
                        request.symbol
                    );
                    continue;
                }
            };

            let warnings = match validate_bars(&bars, &request.symbol) {
                Ok(warnings) => warnings,
                Err(e) => {
                    warn!("AtrService: {} delivered invalid data: {}", source.name(), e);
                    last_invalid = Some(e.to_string());
                    continue;
                }
            };

            if let Some(newest) = bars.last() {
                let age_days = (request.as_of - newest.date).num_days();
                if age_days > self.staleness_tolerance_days {
                    saw_stale = Some(AtrError::Stale {
                        symbol: request.symbol.clone(),
                        age_hours: age_days * 24,
                        tolerance_hours: self.staleness_tolerance_days * 24,
                    });
                    continue;
                }
            }

            let value = match atr(&bars, request.period, request.method)
                .and_then(|value| validate_result(&request.symbol, value, &bars).map(|()| value))
            {
                Ok(value) => value,
                Err(e) => {
                    warn!("AtrService: {} result invalid: {}", source.name(), e);
                    last_invalid = Some(e.to_string());
                    continue;
                }
            };

            let fallback_used = index > 0;
            let mut confidence = source.quality_score();
            if fallback_used {
                confidence -= 0.05;
            }
            if !warnings.is_empty() {
                confidence -= 0.10;
            }
            if bars.len() < 20 {
                confidence -= 0.05;
            }

            if fallback_used {
                self.audit_degraded(request, source.name(), confidence).await;
            }

            return Ok(AtrValue {
                symbol: request.symbol.clone(),
                as_of: request.as_of,
                period: request.period,
                method: request.method,
                value,
                computed_at: Utc::now(),
                source: source.name().to_string(),
                confidence: confidence.clamp(0.0, 1.0),
                fallback_used,
                from_cache: false,
                samples: bars.len(),
            });
        }

        if let Some(stale) = saw_stale {
            return Err(stale);
        }
        if let Some(reason) = last_invalid {
            return Err(AtrError::InvalidData {
                symbol: request.symbol.clone(),
                reason,
            });
        }
        Err(AtrError::NoData {
            symbol: request.symbol.clone(),
            attempted,
        })
    }

    /// Last resort: scale the previous day's cached ATR. Never silent; the
    /// value is capped at degraded confidence and an audit record is written.
    async fn fallback(&self, request: &AtrRequest, cause: AtrError) -> Result<AtrValue, AtrError> {
        let Some(previous) = self.previous_value(&request.symbol) else {
            return Err(cause);
        };
        info!(
            "AtrService: using fallback multiplier for {} (cause: {})",
            request.symbol, cause
        );
        let value = AtrValue {
            symbol: request.symbol.clone(),
            as_of: request.as_of,
            period: request.period,
            method: request.method,
            value: previous.value * FALLBACK_MULTIPLIER,
            computed_at: Utc::now(),
            source: format!("fallback:{}", previous.source),
            confidence: previous.confidence.min(FALLBACK_CONFIDENCE_CAP),
            fallback_used: true,
            from_cache: false,
            samples: previous.samples,
        };
        self.audit_degraded(request, &value.source, value.confidence).await;
        Ok(value)
    }

    async fn audit_degraded(&self, request: &AtrRequest, source: &str, confidence: f64) {
        let event = AuditEvent::new(AuditKind::DataStale, "atr_service")
            .with_subject(request.symbol.clone())
            .with_payload(json!({
                "source": source,
                "confidence": confidence,
                "as_of": request.as_of.to_string(),
            }));
        if let Err(e) = self.audit.append(event).await {
            warn!("AtrService: failed to audit degraded ATR: {}", e);
        }
    }
}

/// Hard violations fail the source; benign irregularities come back as
/// warnings that shave confidence.
fn validate_bars(bars: &[OhlcBar], symbol: &str) -> Result<Vec<String>, AtrError> {
    if bars.is_empty() {
        return Err(AtrError::InvalidData {
            symbol: symbol.to_string(),
            reason: "empty bar window".to_string(),
        });
    }
    let mut warnings = Vec::new();
    for pair in bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(AtrError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("bars out of order at {}", pair[1].date),
            });
        }
        // Weekends and holidays leave gaps; anything wider is suspicious.
        if (pair[1].date - pair[0].date).num_days() > 4 {
            warnings.push(format!(
                "gap of {} days before {}",
                (pair[1].date - pair[0].date).num_days(),
                pair[1].date
            ));
        }
    }
    for bar in bars {
        if bar.open <= Decimal::ZERO || bar.low <= Decimal::ZERO {
            return Err(AtrError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("non-positive price on {}", bar.date),
            });
        }
        if bar.high < bar.open.max(bar.close) || bar.low > bar.open.min(bar.close) {
            return Err(AtrError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("inconsistent OHLC on {}", bar.date),
            });
        }
        if bar.volume < 0 {
            return Err(AtrError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("negative volume on {}", bar.date),
            });
        }
    }
    Ok(warnings)
}

/// Sanity bounds on the computed value itself.
fn validate_result(symbol: &str, value: Decimal, bars: &[OhlcBar]) -> Result<(), AtrError> {
    if value <= Decimal::ZERO {
        return Err(AtrError::InvalidData {
            symbol: symbol.to_string(),
            reason: format!("non-positive ATR {value}"),
        });
    }
    if let Some(last) = bars.last()
        && value > last.close / Decimal::TWO
    {
        return Err(AtrError::InvalidData {
            symbol: symbol.to_string(),
            reason: format!("ATR {value} exceeds half the spot price {}", last.close),
        });
    }
    Ok(())
}
