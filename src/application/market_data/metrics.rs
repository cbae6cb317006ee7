//! Per-symbol rolling metrics: realized volatility windows, volume ratios,
//! liquidity scoring, and threshold alerts.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;
use std::collections::{HashMap, VecDeque};

use crate::domain::market::{MarketAlert, MarketAlertKind, MarketQuote};

/// Alert thresholds, supplied by operational settings.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Absolute fractional move between consecutive quotes.
    pub price_jump_pct: Decimal,
    /// Spread fraction of mid considered alarming.
    pub wide_spread_pct: Decimal,
    /// Volume at this multiple of the rolling average is a surge.
    pub volume_surge_ratio: f64,
    /// Annualized 1-minute realized volatility considered a spike.
    pub volatility_spike: f64,
    /// Minimum seconds between repeated alerts of the same kind.
    pub debounce_secs: i64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            price_jump_pct: Decimal::new(2, 2), // 2%
            wide_spread_pct: Decimal::new(5, 2),
            volume_surge_ratio: 4.0,
            volatility_spike: 1.2,
            debounce_secs: 60,
        }
    }
}

struct Sample {
    ts: DateTime<Utc>,
    mid: Decimal,
    volume: i64,
}

/// Rolling quote window for one symbol. Fifteen minutes of samples covers
/// the 1/5/15-minute volatility ladder.
pub struct SymbolMetrics {
    symbol: String,
    window: VecDeque<Sample>,
    thresholds: AlertThresholds,
    last_alert: HashMap<MarketAlertKind, DateTime<Utc>>,
    avg_daily_volume: i64,
}

const WINDOW_MINUTES: i64 = 15;
const SECONDS_PER_TRADING_YEAR: f64 = 252.0 * 6.5 * 3600.0;

impl SymbolMetrics {
    pub fn new(symbol: impl Into<String>, avg_daily_volume: i64, thresholds: AlertThresholds) -> Self {
        Self {
            symbol: symbol.into(),
            window: VecDeque::new(),
            thresholds,
            last_alert: HashMap::new(),
            avg_daily_volume,
        }
    }

    /// Ingest one quote and return any threshold alerts it fires.
    pub fn observe(&mut self, quote: &MarketQuote) -> Vec<MarketAlert> {
        let mut alerts = Vec::new();

        if let Some(prev) = self.window.back() {
            let prev_mid = prev.mid;
            let mid = quote.mid();
            if prev_mid > Decimal::ZERO {
                let jump = ((mid - prev_mid) / prev_mid).abs();
                if jump >= self.thresholds.price_jump_pct {
                    self.push_alert(
                        &mut alerts,
                        MarketAlertKind::PriceJump,
                        quote.ts,
                        format!("mid moved {jump:.4} between consecutive quotes"),
                    );
                }
            }
        }

        if quote.spread_pct() >= self.thresholds.wide_spread_pct {
            self.push_alert(
                &mut alerts,
                MarketAlertKind::WideSpread,
                quote.ts,
                format!("spread is {:.4} of mid", quote.spread_pct()),
            );
        }

        self.window.push_back(Sample {
            ts: quote.ts,
            mid: quote.mid(),
            volume: quote.volume,
        });
        let horizon = quote.ts - ChronoDuration::minutes(WINDOW_MINUTES);
        while self.window.front().is_some_and(|s| s.ts < horizon) {
            self.window.pop_front();
        }

        let ratio = self.volume_ratio();
        if ratio >= self.thresholds.volume_surge_ratio {
            self.push_alert(
                &mut alerts,
                MarketAlertKind::VolumeSurge,
                quote.ts,
                format!("volume at {ratio:.1}x the daily average pace"),
            );
        }

        if let Some(vol) = self.realized_volatility(ChronoDuration::minutes(1))
            && vol >= self.thresholds.volatility_spike
        {
            self.push_alert(
                &mut alerts,
                MarketAlertKind::VolatilitySpike,
                quote.ts,
                format!("1-minute realized volatility {vol:.2} annualized"),
            );
        }

        alerts
    }

    fn push_alert(
        &mut self,
        alerts: &mut Vec<MarketAlert>,
        kind: MarketAlertKind,
        ts: DateTime<Utc>,
        message: String,
    ) {
        let debounced = self
            .last_alert
            .get(&kind)
            .is_some_and(|last| (ts - *last).num_seconds() < self.thresholds.debounce_secs);
        if debounced {
            return;
        }
        self.last_alert.insert(kind, ts);
        alerts.push(MarketAlert {
            symbol: self.symbol.clone(),
            kind,
            message,
            ts,
        });
    }

    /// Annualized realized volatility over the trailing window, from
    /// log-returns of consecutive mids. None until two samples exist.
    pub fn realized_volatility(&self, window: ChronoDuration) -> Option<f64> {
        let newest = self.window.back()?.ts;
        let horizon = newest - window;
        let mids: Vec<f64> = self
            .window
            .iter()
            .filter(|s| s.ts >= horizon)
            .filter_map(|s| s.mid.to_f64())
            .filter(|m| *m > 0.0)
            .collect();
        if mids.len() < 3 {
            return None;
        }
        let returns: Vec<f64> = mids.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let per_sample = returns.iter().copied().std_dev();
        let span_secs = window.num_seconds().max(1) as f64;
        let sample_interval = span_secs / returns.len() as f64;
        Some(per_sample * (SECONDS_PER_TRADING_YEAR / sample_interval).sqrt())
    }

    /// Current volume pace relative to the N-day average, extrapolated from
    /// the rolling window.
    pub fn volume_ratio(&self) -> f64 {
        if self.avg_daily_volume <= 0 || self.window.len() < 2 {
            return 0.0;
        }
        let window_volume: i64 = self.window.iter().map(|s| s.volume).sum();
        let span_secs = (self.window.back().unwrap().ts - self.window.front().unwrap().ts)
            .num_seconds()
            .max(1) as f64;
        let daily_pace = window_volume as f64 * (6.5 * 3600.0) / span_secs;
        daily_pace / self.avg_daily_volume as f64
    }

    pub fn liquidity_score(&self, quote: &MarketQuote, max_spread_pct: Decimal) -> f64 {
        quote.liquidity_score(self.avg_daily_volume, max_spread_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn quote_at(secs: i64, bid: Decimal, ask: Decimal, volume: i64) -> MarketQuote {
        MarketQuote {
            symbol: "SPY".to_string(),
            ts: Utc.with_ymd_and_hms(2025, 6, 5, 15, 0, 0).unwrap() + ChronoDuration::seconds(secs),
            bid,
            ask,
            last: (bid + ask) / Decimal::TWO,
            volume,
            open_interest: None,
            venue: "sim".to_string(),
        }
    }

    #[test]
    fn price_jump_fires_once_within_debounce() {
        let mut metrics = SymbolMetrics::new("SPY", 1_000_000, AlertThresholds::default());
        assert!(metrics.observe(&quote_at(0, dec!(99.9), dec!(100.1), 100)).is_empty());
        let alerts = metrics.observe(&quote_at(1, dec!(104.9), dec!(105.1), 100));
        assert!(alerts.iter().any(|a| a.kind == MarketAlertKind::PriceJump));
        // Same jump again within the debounce window stays quiet.
        let again = metrics.observe(&quote_at(2, dec!(109.9), dec!(110.1), 100));
        assert!(again.iter().all(|a| a.kind != MarketAlertKind::PriceJump));
    }

    #[test]
    fn wide_spread_alerts() {
        let mut metrics = SymbolMetrics::new("SPY", 1_000_000, AlertThresholds::default());
        let alerts = metrics.observe(&quote_at(0, dec!(95), dec!(105), 100));
        assert!(alerts.iter().any(|a| a.kind == MarketAlertKind::WideSpread));
    }

    #[test]
    fn volatility_needs_enough_samples() {
        let mut metrics = SymbolMetrics::new("SPY", 1_000_000, AlertThresholds::default());
        metrics.observe(&quote_at(0, dec!(99.9), dec!(100.1), 100));
        assert!(metrics.realized_volatility(ChronoDuration::minutes(1)).is_none());
        metrics.observe(&quote_at(10, dec!(100.0), dec!(100.2), 100));
        metrics.observe(&quote_at(20, dec!(100.1), dec!(100.3), 100));
        assert!(metrics.realized_volatility(ChronoDuration::minutes(1)).is_some());
    }

    #[test]
    fn old_samples_roll_off() {
        let mut metrics = SymbolMetrics::new("SPY", 1_000_000, AlertThresholds::default());
        metrics.observe(&quote_at(0, dec!(99.9), dec!(100.1), 100));
        metrics.observe(&quote_at(20 * 60, dec!(99.9), dec!(100.1), 100));
        assert_eq!(metrics.window.len(), 1);
    }
}
