use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One quote as distributed to consumers. `open_interest` is present for
/// option symbols only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: i64,
    pub open_interest: Option<i64>,
    pub venue: String,
}

impl MarketQuote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Spread as a fraction of mid. Zero when the mid is degenerate.
    pub fn spread_pct(&self) -> Decimal {
        let mid = self.mid();
        if mid <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.spread() / mid
    }

    pub fn staleness(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.ts
    }

    /// Composite liquidity score in [0,1]: half from spread tightness against
    /// the reference maximum, half from volume relative to its average.
    pub fn liquidity_score(&self, avg_volume: i64, max_spread_pct: Decimal) -> f64 {
        let spread_component = if max_spread_pct > Decimal::ZERO {
            let ratio = (self.spread_pct() / max_spread_pct)
                .to_f64()
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            1.0 - ratio
        } else {
            0.0
        };
        let volume_component = if avg_volume > 0 {
            (self.volume as f64 / avg_volume as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        0.5 * spread_component + 0.5 * volume_component
    }
}

/// Threshold crossings the Market Data Manager reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketAlertKind {
    VolatilitySpike,
    WideSpread,
    PriceJump,
    VolumeSurge,
}

impl fmt::Display for MarketAlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketAlertKind::VolatilitySpike => write!(f, "volatility_spike"),
            MarketAlertKind::WideSpread => write!(f, "wide_spread"),
            MarketAlertKind::PriceJump => write!(f, "price_jump"),
            MarketAlertKind::VolumeSurge => write!(f, "volume_surge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAlert {
    pub symbol: String,
    pub kind: MarketAlertKind,
    pub message: String,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(bid: Decimal, ask: Decimal, volume: i64) -> MarketQuote {
        MarketQuote {
            symbol: "SPY".to_string(),
            ts: Utc::now(),
            bid,
            ask,
            last: (bid + ask) / Decimal::TWO,
            volume,
            open_interest: Some(5000),
            venue: "sim".to_string(),
        }
    }

    #[test]
    fn spread_pct_against_mid() {
        let q = quote(dec!(2.485), dec!(2.515), 1000);
        assert_eq!(q.mid(), dec!(2.50));
        assert_eq!(q.spread(), dec!(0.030));
        assert_eq!(q.spread_pct(), dec!(0.012));
    }

    #[test]
    fn liquidity_score_bounds() {
        let tight = quote(dec!(2.499), dec!(2.501), 2000);
        let wide = quote(dec!(2.30), dec!(2.70), 10);
        let tight_score = tight.liquidity_score(1000, dec!(0.05));
        let wide_score = wide.liquidity_score(1000, dec!(0.05));
        assert!(tight_score > 0.9);
        assert!(wide_score < 0.1);
        assert!((0.0..=1.0).contains(&tight_score));
        assert!((0.0..=1.0).contains(&wide_score));
    }

    #[test]
    fn degenerate_mid_yields_zero_spread_pct() {
        let q = quote(dec!(0), dec!(0), 100);
        assert_eq!(q.spread_pct(), Decimal::ZERO);
    }
}
