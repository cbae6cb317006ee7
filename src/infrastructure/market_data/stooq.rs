//! Daily-bars source backed by the Stooq CSV endpoint. No API key; quality
//! is decent but the data is end-of-day only, so it sits behind any broker
//! source in the fallback order.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::errors::AtrError;
use crate::domain::ports::BarSource;
use crate::domain::types::OhlcBar;

pub struct StooqBarSource {
    client: reqwest::Client,
    base_url: String,
}

impl StooqBarSource {
    pub fn new() -> Self {
        Self::with_base_url("https://stooq.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for StooqBarSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarSource for StooqBarSource {
    fn name(&self) -> &str {
        "stooq"
    }

    fn quality_score(&self) -> f64 {
        0.80
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<Vec<OhlcBar>, AtrError> {
        let start = end - chrono::Duration::days(days as i64);
        let url = format!(
            "{}/q/d/l/?s={}.us&d1={}&d2={}&i=d",
            self.base_url,
            symbol.to_lowercase(),
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        );

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AtrError::Fetch {
                source_name: "stooq".to_string(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| AtrError::Fetch {
                source_name: "stooq".to_string(),
                reason: e.to_string(),
            })?
            .text()
            .await
            .map_err(|e| AtrError::Fetch {
                source_name: "stooq".to_string(),
                reason: e.to_string(),
            })?;

        parse_stooq_csv(symbol, &body)
    }
}

/// Stooq delivers `Date,Open,High,Low,Close,Volume` with an ISO date.
fn parse_stooq_csv(symbol: &str, body: &str) -> Result<Vec<OhlcBar>, AtrError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body.as_bytes());

    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| AtrError::InvalidData {
            symbol: symbol.to_string(),
            reason: format!("csv parse: {e}"),
        })?;
        if record.len() < 6 {
            return Err(AtrError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("short row: {record:?}"),
            });
        }
        let field = |i: usize| -> &str { record.get(i).unwrap_or_default() };
        let date = NaiveDate::from_str(field(0)).map_err(|e| AtrError::InvalidData {
            symbol: symbol.to_string(),
            reason: format!("bad date {}: {e}", field(0)),
        })?;
        let price = |i: usize| -> Result<Decimal, AtrError> {
            Decimal::from_str(field(i)).map_err(|e| AtrError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("bad price {}: {e}", field(i)),
            })
        };
        bars.push(OhlcBar {
            symbol: symbol.to_string(),
            date,
            open: price(1)?,
            high: price(2)?,
            low: price(3)?,
            close: price(4)?,
            volume: field(5).parse().unwrap_or(0),
        });
    }

    if bars.is_empty() {
        return Err(AtrError::NoData {
            symbol: symbol.to_string(),
            attempted: vec!["stooq".to_string()],
        });
    }
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}
