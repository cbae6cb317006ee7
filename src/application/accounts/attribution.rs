//! Performance attribution: per-account equity curves and closed-trade
//! records, rolled up the account tree with value weighting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::domain::types::AccountId;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub time_weighted_return: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trades: usize,
}

struct EquityPoint {
    #[allow(dead_code)]
    ts: DateTime<Utc>,
    value: f64,
}

#[derive(Default)]
pub struct AttributionTracker {
    equity: HashMap<AccountId, Vec<EquityPoint>>,
    trade_pnls: HashMap<AccountId, Vec<f64>>,
    /// Annualized risk-free rate from policy configuration.
    risk_free_rate: f64,
}

const PERIODS_PER_YEAR: f64 = 252.0;

impl AttributionTracker {
    pub fn new(risk_free_rate: f64) -> Self {
        Self {
            risk_free_rate,
            ..Self::default()
        }
    }

    pub fn record_equity(&mut self, account_id: AccountId, ts: DateTime<Utc>, value: Decimal) {
        if let Some(value) = value.to_f64() {
            self.equity
                .entry(account_id)
                .or_default()
                .push(EquityPoint { ts, value });
        }
    }

    pub fn record_trade(&mut self, account_id: AccountId, pnl: Decimal) {
        if let Some(pnl) = pnl.to_f64() {
            self.trade_pnls.entry(account_id).or_default().push(pnl);
        }
    }

    pub fn win_rate(&self, account_id: AccountId) -> Option<f64> {
        let pnls = self.trade_pnls.get(&account_id)?;
        if pnls.is_empty() {
            return None;
        }
        Some(pnls.iter().filter(|p| **p > 0.0).count() as f64 / pnls.len() as f64)
    }

    pub fn report(&self, account_id: AccountId) -> Option<PerformanceReport> {
        let curve = self.equity.get(&account_id)?;
        if curve.len() < 2 {
            return None;
        }
        let values: Vec<f64> = curve.iter().map(|p| p.value).collect();
        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();

        let time_weighted_return = returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
        let max_drawdown = max_drawdown(&values);
        let sharpe = sharpe(&returns, self.risk_free_rate);

        let pnls = self.trade_pnls.get(&account_id).cloned().unwrap_or_default();
        let wins: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let losses: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| -p).sum();
        let win_rate = if pnls.is_empty() {
            0.0
        } else {
            pnls.iter().filter(|p| **p > 0.0).count() as f64 / pnls.len() as f64
        };
        let profit_factor = if losses > 0.0 { wins / losses } else { f64::INFINITY };

        Some(PerformanceReport {
            time_weighted_return,
            max_drawdown,
            sharpe,
            win_rate,
            profit_factor,
            trades: pnls.len(),
        })
    }

    /// Value-weighted aggregate over a set of accounts (an account subtree).
    pub fn aggregate(&self, weights: &[(AccountId, Decimal)]) -> Option<PerformanceReport> {
        let mut reports = Vec::new();
        let mut total_weight = 0.0;
        for (id, value) in weights {
            if let (Some(report), Some(weight)) = (self.report(*id), value.to_f64()) {
                total_weight += weight;
                reports.push((report, weight));
            }
        }
        if reports.is_empty() || total_weight <= 0.0 {
            return None;
        }

        let weighted = |f: fn(&PerformanceReport) -> f64| {
            reports.iter().map(|(r, w)| f(r) * w).sum::<f64>() / total_weight
        };
        Some(PerformanceReport {
            time_weighted_return: weighted(|r| r.time_weighted_return),
            max_drawdown: weighted(|r| r.max_drawdown),
            sharpe: weighted(|r| r.sharpe),
            win_rate: weighted(|r| r.win_rate),
            profit_factor: reports
                .iter()
                .map(|(r, w)| r.profit_factor.min(10.0) * w)
                .sum::<f64>()
                / total_weight,
            trades: reports.iter().map(|(r, _)| r.trades).sum(),
        })
    }
}

fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst: f64 = 0.0;
    for v in values {
        peak = peak.max(*v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak);
        }
    }
    worst
}

fn sharpe(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let rf_per_period = risk_free_rate / PERIODS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - rf_per_period).collect();
    let mean = excess.iter().copied().mean();
    let std_dev = excess.iter().copied().std_dev();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev * PERIODS_PER_YEAR.sqrt()
}
