//! Operational settings, distinct from the Constitution: queue sizes,
//! timeouts, data locations, mode. Loaded from the environment; reloadable
//! by restart without touching the rule document.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Simulated broker and quote feeds; no network.
    Mock,
    /// Live adapters (paper broker wiring, HTTP bar sources).
    Paper,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "paper" => Ok(Mode::Paper),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'paper'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub constitution_path: PathBuf,
    pub database_url: String,
    pub symbols: Vec<String>,
    pub total_capital: Decimal,

    // Queues and pacing
    pub audit_queue_depth: usize,
    pub submit_queue_depth: usize,
    pub market_queue_depth: usize,
    pub max_orders_per_minute: u32,

    // Deadlines
    pub atr_fetch_timeout: Duration,
    pub order_submit_timeout: Duration,
    pub order_fill_deadline: Duration,
    pub broker_connect_timeout: Duration,
    pub exit_retry_deadline: Duration,
    pub drain_deadline: Duration,

    // Caching and freshness
    pub atr_cache_ttl: Duration,
    pub quote_freshness_market_hours: Duration,
    pub quote_freshness_off_hours: Duration,

    // Policy knobs that are operational, not constitutional
    pub risk_free_rate: f64,
    pub reconcile_tolerance: Decimal,
    /// Operator estimate of per-contract hedge premium, used for sizing.
    pub hedge_premium_estimate: Decimal,

    // Observability
    pub metrics_interval: Duration,
    pub metrics_enabled: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env_or(key, default);
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Failed to parse {key}={raw}: {e}"))
}

fn secs_env(key: &str, default: &str) -> Result<Duration> {
    Ok(Duration::from_secs(parse_env::<u64>(key, default)?))
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mode = env_or("MODE", "mock").parse::<Mode>()?;

        let symbols: Vec<String> = env_or("SYMBOLS", "SPY,QQQ,IWM")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let total_capital = Decimal::from_str(&env_or("TOTAL_CAPITAL", "300000"))
            .context("Failed to parse TOTAL_CAPITAL")?;
        let reconcile_tolerance = Decimal::from_str(&env_or("RECONCILE_TOLERANCE", "1.00"))
            .context("Failed to parse RECONCILE_TOLERANCE")?;
        let hedge_premium_estimate = Decimal::from_str(&env_or("HEDGE_PREMIUM_ESTIMATE", "5.00"))
            .context("Failed to parse HEDGE_PREMIUM_ESTIMATE")?;

        Ok(Self {
            mode,
            constitution_path: PathBuf::from(env_or("CONSTITUTION_PATH", "constitution.toml")),
            database_url: env_or("DATABASE_URL", "sqlite://covenant.db"),
            symbols,
            total_capital,

            audit_queue_depth: parse_env("AUDIT_QUEUE_DEPTH", "256")?,
            submit_queue_depth: parse_env("SUBMIT_QUEUE_DEPTH", "64")?,
            market_queue_depth: parse_env("MARKET_QUEUE_DEPTH", "512")?,
            max_orders_per_minute: parse_env("MAX_ORDERS_PER_MINUTE", "30")?,

            atr_fetch_timeout: secs_env("ATR_FETCH_TIMEOUT_SECS", "30")?,
            order_submit_timeout: secs_env("ORDER_SUBMIT_TIMEOUT_SECS", "10")?,
            order_fill_deadline: secs_env("ORDER_FILL_DEADLINE_SECS", "300")?,
            broker_connect_timeout: secs_env("BROKER_CONNECT_TIMEOUT_SECS", "30")?,
            exit_retry_deadline: secs_env("EXIT_RETRY_DEADLINE_SECS", "120")?,
            drain_deadline: secs_env("DRAIN_DEADLINE_SECS", "15")?,

            atr_cache_ttl: secs_env("ATR_CACHE_TTL_SECS", "300")?,
            quote_freshness_market_hours: secs_env("QUOTE_FRESHNESS_MARKET_SECS", "5")?,
            quote_freshness_off_hours: secs_env("QUOTE_FRESHNESS_OFF_SECS", "300")?,

            risk_free_rate: parse_env("RISK_FREE_RATE", "0.04")?,
            reconcile_tolerance,
            hedge_premium_estimate,

            metrics_interval: secs_env("METRICS_INTERVAL_SECS", "60")?,
            metrics_enabled: parse_env("METRICS_ENABLED", "true")?,
        })
    }

    /// Defaults suitable for tests and mock mode, no environment reads.
    pub fn mock() -> Self {
        Self {
            mode: Mode::Mock,
            constitution_path: PathBuf::from("constitution.toml"),
            database_url: "sqlite::memory:".to_string(),
            symbols: vec!["SPY".to_string()],
            total_capital: Decimal::from(300_000),
            audit_queue_depth: 256,
            submit_queue_depth: 64,
            market_queue_depth: 512,
            max_orders_per_minute: 60,
            atr_fetch_timeout: Duration::from_secs(5),
            order_submit_timeout: Duration::from_secs(5),
            order_fill_deadline: Duration::from_secs(300),
            broker_connect_timeout: Duration::from_secs(5),
            exit_retry_deadline: Duration::from_secs(30),
            drain_deadline: Duration::from_secs(5),
            atr_cache_ttl: Duration::from_secs(300),
            quote_freshness_market_hours: Duration::from_secs(5),
            quote_freshness_off_hours: Duration::from_secs(300),
            risk_free_rate: 0.04,
            reconcile_tolerance: Decimal::ONE,
            hedge_premium_estimate: Decimal::from(5),
            metrics_interval: Duration::from_secs(60),
            metrics_enabled: false,
        }
    }
}
