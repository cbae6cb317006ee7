//! Covenant server - headless, rules-first portfolio operation engine.
//!
//! Runs the full engine against the adapters selected by MODE. Metrics are
//! pushed as structured JSON to stdout; there is no listening socket.
//!
//! # Usage
//! ```sh
//! covenant run                # start the engine
//! covenant check              # validate the constitution document and exit
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use covenant::application::system::{Adapters, Application};
use covenant::config::{Mode, Settings};
use covenant::domain::constitution::Constitution;
use covenant::domain::ports::{BarSource, QuoteSource};
use covenant::infrastructure::broker::{PaperBroker, PaperBrokerConfig};
use covenant::infrastructure::market_data::{SimBarSource, SimQuoteSource, StooqBarSource};
use covenant::infrastructure::observability::{Metrics, MetricsReporter};

#[derive(Parser)]
#[command(name = "covenant", version, about = "Rules-first options-income engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine (default).
    Run,
    /// Validate the constitution document and exit.
    Check {
        /// Path to the document; defaults to CONSTITUTION_PATH.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Check { path } => check(path),
        Command::Run => run().await,
    }
}

fn check(path: Option<PathBuf>) -> Result<()> {
    let settings = Settings::from_env()?;
    let path = path.unwrap_or(settings.constitution_path);
    let constitution = Constitution::load(&path)
        .with_context(|| format!("constitution at {} is invalid", path.display()))?;
    println!(
        "constitution v{} valid (protocol ATR({}), fork floor {})",
        constitution.version(),
        constitution.protocol().atr_period,
        constitution.capital().min_fork_confidence,
    );
    Ok(())
}

async fn run() -> Result<()> {
    info!("Covenant {} starting...", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_env()?;
    let constitution = if settings.constitution_path.exists() {
        Constitution::load(&settings.constitution_path)?
    } else if settings.mode == Mode::Mock {
        info!(
            "No constitution document at {}; mock mode uses the builtin v1.3",
            settings.constitution_path.display()
        );
        Constitution::builtin()
    } else {
        anyhow::bail!(
            "constitution document not found at {}",
            settings.constitution_path.display()
        );
    };
    info!(
        "Mode: {:?}, symbols: {:?}, constitution v{}",
        settings.mode,
        settings.symbols,
        constitution.version()
    );

    let adapters = build_adapters(&settings);
    let app = Application::build(settings.clone(), constitution, adapters).await?;
    let handle = app.start().await?;

    if settings.metrics_enabled {
        let metrics = Metrics::new()?;
        let reporter = MetricsReporter::new(handle.clone(), metrics, settings.metrics_interval);
        tokio::spawn(reporter.run());
        info!("Metrics reporter started (interval: {:?})", settings.metrics_interval);
    }

    info!("Engine running. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining...");
    handle.stop().await;
    Ok(())
}

fn build_adapters(settings: &Settings) -> Adapters {
    let broker = Arc::new(PaperBroker::new(PaperBrokerConfig {
        initial_equity: settings.total_capital,
        ..PaperBrokerConfig::default()
    }));

    // Quote feeds: a primary and a lower-quality backup for failover. Live
    // streaming adapters plug in here; the engine consumes the port only.
    let primary = SimQuoteSource::new("sim-primary", 0.95, Duration::from_millis(500));
    let backup = SimQuoteSource::new("sim-backup", 0.85, Duration::from_millis(500));
    for symbol in &settings.symbols {
        primary.set_mark(symbol, dec!(100));
        backup.set_mark(symbol, dec!(100));
    }
    primary.set_mark("VIX", dec!(16));
    backup.set_mark("VIX", dec!(16));
    let quote_sources: Vec<Arc<dyn QuoteSource>> = vec![Arc::new(primary), Arc::new(backup)];

    let bar_sources: Vec<Arc<dyn BarSource>> = match settings.mode {
        Mode::Paper => vec![
            Arc::new(StooqBarSource::new()),
            Arc::new(SimBarSource::new("sim-bars", 0.70)),
        ],
        Mode::Mock => vec![Arc::new(SimBarSource::new("sim-bars", 0.90))],
    };

    let avg_daily_volumes: HashMap<String, i64> = settings
        .symbols
        .iter()
        .map(|s| (s.clone(), 1_000_000))
        .collect();

    Adapters {
        broker,
        quote_sources,
        bar_sources,
        avg_daily_volumes,
    }
}
