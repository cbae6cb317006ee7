//! Shared harness for the integration suite: a full engine wired to the
//! paper broker and simulated feeds, with a constitution document whose
//! schedule admits the moment the test runs.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use covenant::application::system::{Adapters, Application, OpenPositionRequest, SystemHandle};
use covenant::config::Settings;
use covenant::domain::constitution::Constitution;
use covenant::domain::errors::AtrError;
use covenant::domain::ports::{BarSource, QuoteSource};
use covenant::domain::rules::action::LiquiditySnapshot;
use covenant::domain::types::{OhlcBar, Sleeve, StrategyKind};
use covenant::infrastructure::broker::{PaperBroker, PaperBrokerConfig};
use covenant::infrastructure::market_data::SimQuoteSource;

pub struct DocOptions {
    pub cadence_secs: u64,
    pub daily_contract_cap: i64,
}

impl Default for DocOptions {
    fn default() -> Self {
        Self {
            cadence_secs: 1,
            daily_contract_cap: 500,
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// The canonical document with every sleeve's window opened to the moment
/// the test runs and the protocol cadences tightened for test time.
pub fn test_constitution(options: &DocOptions) -> Constitution {
    let today = weekday_name(Utc::now().weekday());
    let raw = format!(
        r#"
version = "1.3.0-test"

[sleeves]
gen_ratio = "0.40"
rev_ratio = "0.30"
com_ratio = "0.30"

[sleeves.gen]
instruments = ["AAPL", "MSFT", "AMZN", "GOOG", "SPY", "QQQ", "IWM"]
strategy = "csp"
delta = {{ min = "0.40", max = "0.45" }}
dte = {{ min = 0, max = 1 }}
stress_dte = {{ min = 1, max = 3 }}
schedule = {{ weekday = "{today}", open = "00:00:00", close = "23:59:59" }}
fork_threshold = "100000"
reinvestment = {{ contracts_share = "0.75", leaps_share = "0.25" }}

[sleeves.rev]
instruments = ["NVDA", "TSLA"]
strategy = "csp"
delta = {{ min = "0.30", max = "0.35" }}
dte = {{ min = 3, max = 5 }}
schedule = {{ weekday = "{today}", open = "00:00:00", close = "23:59:59" }}
fork_threshold = "500000"
reinvestment = {{ contracts_share = "0.75", leaps_share = "0.25" }}

[sleeves.com]
instruments = ["AAPL", "MSFT", "AMZN", "GOOGL", "NVDA", "TSLA", "META"]
strategy = "cc"
delta = {{ min = "0.20", max = "0.25" }}
dte = {{ min = 5, max = 5 }}
schedule = {{ weekday = "{today}", open = "00:00:00", close = "23:59:59" }}
reinvestment = {{ contracts_share = "0.75", leaps_share = "0.25" }}

[capital]
deployment_min = "0.95"
deployment_max = "1.00"
per_symbol_cap = "0.25"
margin_cap = "0.50"
slice_threshold = 50
daily_contract_cap = {daily_cap}
max_forks_per_account = 10
min_fork_confidence = "0.75"

[protocol]
atr_period = 5
level1_multiple = "1.0"
level2_multiple = "2.0"
level3_multiple = "3.0"
cadence_l0_secs = {cadence}
cadence_l1_secs = {cadence}
cadence_l2_secs = {cadence}
cadence_l3_secs = 1
stop_loss_multiple = "3.0"
max_loss_fraction = "0.05"
roll_cost_threshold = "0.50"

[liquidity]
min_open_interest = 500
min_daily_volume = 100
max_spread_pct = "0.05"
max_adv_fraction = "0.10"
warning_fraction = "0.80"

[hedging]
budget_min_pct = "0.05"
budget_max_pct = "0.10"
vix_hedged_week = "50"
vix_safe_mode = "65"
vix_kill_switch = "80"
spx_put_delta = "0.10"
spx_put_delta_tolerance = "0.02"
vix_call_strike_buffer = "5"
dte = {{ min = 30, max = 90 }}
rebalance_threshold = "0.20"

[llms]
growth_delta = {{ min = "0.60", max = "0.80" }}
hedge_delta = {{ min = "0.20", max = "0.40" }}
growth_months_min = 12
growth_months_max = 18
hedge_months_min = 6
hedge_months_max = 12
profit_take_threshold = "2.00"
partial_profit_threshold = "1.00"
partial_profit_fraction = "0.50"
stop_loss_threshold = "-0.50"
reinvestment_share = "0.25"
"#,
        today = today,
        cadence = options.cadence_secs,
        daily_cap = options.daily_contract_cap,
    );
    Constitution::from_toml_str(&raw).expect("test constitution must validate")
}

/// Deterministic daily bars around a base price with a constant true range
/// of 5, ending on the requested as-of date.
pub struct FixedBarSource {
    pub base: Decimal,
}

#[async_trait]
impl BarSource for FixedBarSource {
    fn name(&self) -> &str {
        "fixed-bars"
    }

    fn quality_score(&self) -> f64 {
        0.90
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        end: NaiveDate,
        _days: u32,
    ) -> Result<Vec<OhlcBar>, AtrError> {
        let mut bars = Vec::new();
        for offset in (0..10).rev() {
            let date = end - chrono::Duration::days(offset);
            bars.push(OhlcBar {
                symbol: symbol.to_string(),
                date,
                open: self.base,
                high: self.base + dec!(3),
                low: self.base - dec!(2),
                close: self.base,
                volume: 1_000_000,
            });
        }
        Ok(bars)
    }
}

pub struct Harness {
    pub handle: SystemHandle,
    pub broker: Arc<PaperBroker>,
    pub primary: Arc<SimQuoteSource>,
    pub backup: Arc<SimQuoteSource>,
}

pub struct HarnessOptions {
    pub total_capital: Decimal,
    pub doc: DocOptions,
    pub primary_fails_after: Option<usize>,
    pub broker_seed: Vec<(String, i64, Decimal)>,
    pub spy_mark: Decimal,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            total_capital: dec!(3000000),
            doc: DocOptions::default(),
            primary_fails_after: None,
            broker_seed: Vec::new(),
            spy_mark: dec!(450),
        }
    }
}

pub async fn start_system(options: HarnessOptions) -> Harness {
    let mut settings = Settings::mock();
    settings.total_capital = options.total_capital;
    settings.symbols = vec!["SPY".to_string()];
    settings.quote_freshness_market_hours = Duration::from_millis(500);
    settings.quote_freshness_off_hours = Duration::from_millis(500);
    settings.exit_retry_deadline = Duration::from_secs(5);
    settings.drain_deadline = Duration::from_secs(2);

    let constitution = test_constitution(&options.doc);

    let broker = Arc::new(PaperBroker::new(PaperBrokerConfig {
        initial_equity: options.total_capital,
        auto_fill: true,
        fill_delay: Duration::from_millis(10),
        reject_symbols: Vec::new(),
    }));
    for (symbol, qty, price) in &options.broker_seed {
        broker.seed_position(symbol, *qty, *price);
    }

    let mut primary = SimQuoteSource::new("sim-primary", 0.95, Duration::from_millis(50));
    if let Some(after) = options.primary_fails_after {
        primary = primary.failing_after(after);
    }
    let primary = Arc::new(primary);
    let backup = Arc::new(SimQuoteSource::new(
        "sim-backup",
        0.85,
        Duration::from_millis(50),
    ));
    for source in [&primary, &backup] {
        source.set_mark("SPY", options.spy_mark);
        source.set_mark("VIX", dec!(16));
    }

    let adapters = Adapters {
        broker: broker.clone(),
        quote_sources: vec![
            primary.clone() as Arc<dyn QuoteSource>,
            backup.clone() as Arc<dyn QuoteSource>,
        ],
        bar_sources: vec![Arc::new(FixedBarSource { base: options.spy_mark }) as Arc<dyn BarSource>],
        avg_daily_volumes: HashMap::from([("SPY".to_string(), 1_000_000)]),
    };

    let app = Application::build(settings, constitution, adapters)
        .await
        .expect("engine must build");
    let handle = app.start().await.expect("engine must start");

    Harness {
        handle,
        broker,
        primary,
        backup,
    }
}

/// The S1 proposal: a Gen-sleeve SPY cash-secured put that clears every
/// constitutional guard.
pub fn csp_open(client_order_id: &str, contracts: i64) -> OpenPositionRequest {
    OpenPositionRequest {
        client_order_id: client_order_id.to_string(),
        sleeve: Sleeve::Gen,
        symbol: "SPY".to_string(),
        strategy: StrategyKind::Csp,
        delta: dec!(0.42),
        dte: 1,
        stress_mode: false,
        contracts,
        strike: dec!(450),
        option_mid: dec!(2.50),
        liquidity: LiquiditySnapshot {
            open_interest: 5000,
            daily_volume: 1000,
            bid: dec!(2.485),
            ask: dec!(2.515),
            avg_daily_volume: 20000,
        },
    }
}

/// Poll until the condition holds or the timeout elapses.
pub async fn wait_for<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
