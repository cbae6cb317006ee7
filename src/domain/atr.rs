//! True-range and ATR math over validated daily bars. Pure functions; data
//! sourcing, caching, and confidence live in the ATR service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::AtrError;
use crate::domain::types::OhlcBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtrMethod {
    Sma,
    Ema,
    Wilder,
}

impl fmt::Display for AtrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtrMethod::Sma => write!(f, "sma"),
            AtrMethod::Ema => write!(f, "ema"),
            AtrMethod::Wilder => write!(f, "wilder"),
        }
    }
}

impl FromStr for AtrMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sma" => Ok(AtrMethod::Sma),
            "ema" => Ok(AtrMethod::Ema),
            "wilder" => Ok(AtrMethod::Wilder),
            other => Err(format!("unknown ATR method: {other}")),
        }
    }
}

/// A computed ATR with its provenance and quality marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtrValue {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub period: usize,
    pub method: AtrMethod,
    pub value: Decimal,
    pub computed_at: DateTime<Utc>,
    pub source: String,
    /// Quality in [0,1]; degraded by fallbacks and thin samples.
    pub confidence: f64,
    pub fallback_used: bool,
    pub from_cache: bool,
    pub samples: usize,
}

/// TR_i = max(high-low, |high-prev_close|, |low-prev_close|); the first bar
/// has no previous close and contributes its plain range.
pub fn true_ranges(bars: &[OhlcBar]) -> Vec<Decimal> {
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let range = bar.high - bar.low;
        let tr = if i == 0 {
            range
        } else {
            let prev_close = bars[i - 1].close;
            range
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        out.push(tr);
    }
    out
}

/// Compute ATR over the bar window. Exactly `period` bars is the minimum
/// valid window; fewer is `InvalidData`.
pub fn atr(bars: &[OhlcBar], period: usize, method: AtrMethod) -> Result<Decimal, AtrError> {
    let symbol = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
    if bars.len() < period {
        return Err(AtrError::InvalidData {
            symbol,
            reason: format!("{} bars < period {}", bars.len(), period),
        });
    }
    let trs = true_ranges(bars);
    let value = match method {
        AtrMethod::Sma => mean(&trs[trs.len() - period..]),
        AtrMethod::Ema => smoothed(&trs, period, ema_alpha(period)),
        AtrMethod::Wilder => smoothed(&trs, period, wilder_alpha(period)),
    };
    Ok(value)
}

fn ema_alpha(period: usize) -> Decimal {
    Decimal::TWO / Decimal::from(period as u64 + 1)
}

fn wilder_alpha(period: usize) -> Decimal {
    Decimal::ONE / Decimal::from(period as u64)
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
}

/// Seed with the SMA of the first `period` samples, then fold the remainder
/// with the given smoothing factor.
fn smoothed(trs: &[Decimal], period: usize, alpha: Decimal) -> Decimal {
    let mut value = mean(&trs[..period]);
    for tr in &trs[period..] {
        value = alpha * *tr + (Decimal::ONE - alpha) * value;
    }
    value
}
