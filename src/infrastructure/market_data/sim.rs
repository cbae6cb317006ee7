//! Simulated market data: a controllable quote source and a synthetic
//! daily-bar source, used by mock mode and the integration suite.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::errors::{AtrError, MarketDataError};
use crate::domain::market::MarketQuote;
use crate::domain::ports::{BarSource, QuoteSource};
use crate::domain::types::OhlcBar;

/// Quote source fed from a shared mark table. Tests and mock mode move the
/// marks; subscribers see fresh quotes on every tick.
pub struct SimQuoteSource {
    name: String,
    quality: f64,
    marks: Arc<Mutex<HashMap<String, Decimal>>>,
    tick_interval: Duration,
    /// End the stream after this many quotes per symbol (drives failover
    /// tests). None streams forever.
    quotes_before_silence: Option<usize>,
}

impl SimQuoteSource {
    pub fn new(name: impl Into<String>, quality: f64, tick_interval: Duration) -> Self {
        Self {
            name: name.into(),
            quality,
            marks: Arc::new(Mutex::new(HashMap::new())),
            tick_interval,
            quotes_before_silence: None,
        }
    }

    pub fn failing_after(mut self, quotes: usize) -> Self {
        self.quotes_before_silence = Some(quotes);
        self
    }

    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.marks
            .lock()
            .expect("sim marks poisoned")
            .insert(symbol.to_string(), price);
    }

    pub fn marks_handle(&self) -> Arc<Mutex<HashMap<String, Decimal>>> {
        self.marks.clone()
    }
}

#[async_trait]
impl QuoteSource for SimQuoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn quality(&self) -> f64 {
        self.quality
    }

    async fn subscribe(
        &self,
        symbols: &[String],
    ) -> Result<mpsc::Receiver<MarketQuote>, MarketDataError> {
        let (tx, rx) = mpsc::channel(64);
        let marks = self.marks.clone();
        let interval = self.tick_interval;
        let venue = self.name.clone();
        let symbols = symbols.to_vec();
        let budget = self.quotes_before_silence;

        tokio::spawn(async move {
            let mut sent = 0usize;
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                for symbol in &symbols {
                    let Some(mark) = marks.lock().expect("sim marks poisoned").get(symbol).copied()
                    else {
                        continue;
                    };
                    let half_spread = (mark * Decimal::new(1, 3)).max(Decimal::new(1, 2));
                    let quote = MarketQuote {
                        symbol: symbol.clone(),
                        ts: Utc::now(),
                        bid: mark - half_spread,
                        ask: mark + half_spread,
                        last: mark,
                        volume: 1000,
                        open_interest: Some(5000),
                        venue: venue.clone(),
                    };
                    if tx.send(quote).await.is_err() {
                        return;
                    }
                    sent += 1;
                    if budget.is_some_and(|b| sent >= b) {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Synthetic daily OHLC: a bounded random walk seeded per symbol, skipping
/// weekends, deterministic enough for ATR plumbing in mock mode.
pub struct SimBarSource {
    name: String,
    quality: f64,
    base_prices: HashMap<String, Decimal>,
    daily_range_pct: f64,
}

impl SimBarSource {
    pub fn new(name: impl Into<String>, quality: f64) -> Self {
        Self {
            name: name.into(),
            quality,
            base_prices: HashMap::new(),
            daily_range_pct: 0.015,
        }
    }

    pub fn with_base_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.base_prices.insert(symbol.to_string(), price);
        self
    }
}

#[async_trait]
impl BarSource for SimBarSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn quality_score(&self) -> f64 {
        self.quality
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<Vec<OhlcBar>, AtrError> {
        let base = self
            .base_prices
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE_HUNDRED);
        let mut rng = rand::rng();
        let mut close = base;
        let mut bars = Vec::new();
        let mut date = end - chrono::Duration::days(days as i64);

        while date <= end {
            if date.weekday() != Weekday::Sat && date.weekday() != Weekday::Sun {
                let drift = rng.random_range(-self.daily_range_pct..self.daily_range_pct);
                let range = rng.random_range(0.002..self.daily_range_pct);
                let next_close = close * decimal(1.0 + drift);
                let high = close.max(next_close) * decimal(1.0 + range / 2.0);
                let low = close.min(next_close) * decimal(1.0 - range / 2.0);
                bars.push(OhlcBar {
                    symbol: symbol.to_string(),
                    date,
                    open: close,
                    high,
                    low,
                    close: next_close,
                    volume: rng.random_range(500_000..2_000_000),
                });
                close = next_close;
            }
            date += chrono::Duration::days(1);
        }
        Ok(bars)
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn quotes_track_the_mark_table() {
        let source = SimQuoteSource::new("sim", 0.9, Duration::from_millis(5));
        source.set_mark("SPY", dec!(450));
        let mut rx = source.subscribe(&["SPY".to_string()]).await.unwrap();
        let quote = rx.recv().await.unwrap();
        assert_eq!(quote.symbol, "SPY");
        assert_eq!(quote.last, dec!(450));
        assert!(quote.bid < quote.ask);
    }

    #[tokio::test]
    async fn failing_source_goes_silent() {
        let source = SimQuoteSource::new("flaky", 0.9, Duration::from_millis(5)).failing_after(2);
        source.set_mark("SPY", dec!(450));
        let mut rx = source.subscribe(&["SPY".to_string()]).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn synthetic_bars_are_well_formed() {
        let source = SimBarSource::new("sim-bars", 0.8).with_base_price("SPY", dec!(450));
        let end: NaiveDate = "2025-06-06".parse().unwrap();
        let bars = source.daily_bars("SPY", end, 10).await.unwrap();
        assert!(bars.len() >= 6);
        for bar in &bars {
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.low > Decimal::ZERO);
            assert_ne!(bar.date.weekday(), Weekday::Sat);
            assert_ne!(bar.date.weekday(), Weekday::Sun);
        }
    }
}
