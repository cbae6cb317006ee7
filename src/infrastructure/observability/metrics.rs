//! Prometheus metrics definitions. All metrics use the `covenant_` prefix
//! and are push-reported; nothing here listens on a port.

use prometheus::{
    CounterVec, Gauge, GaugeVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Account value per sleeve in USD
    pub account_value_usd: GenericGaugeVec<AtomicF64>,
    /// Reserved capital per sleeve in USD
    pub reserved_capital_usd: GenericGaugeVec<AtomicF64>,
    /// Open positions count
    pub open_positions: GenericGauge<AtomicF64>,
    /// Open (non-terminal) orders count
    pub open_orders: GenericGauge<AtomicF64>,
    /// Audit records by kind
    pub audit_records_total: CounterVec,
    /// Rule evaluations by verdict
    pub rule_evaluations_total: CounterVec,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// Overall health (0=healthy, 1=degraded, 2=error)
    pub health_status: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let account_value_usd = GaugeVec::new(
            Opts::new("covenant_account_value_usd", "Account value per sleeve in USD"),
            &["sleeve"],
        )?;
        registry.register(Box::new(account_value_usd.clone()))?;

        let reserved_capital_usd = GaugeVec::new(
            Opts::new(
                "covenant_reserved_capital_usd",
                "Reserved capital per sleeve in USD",
            ),
            &["sleeve"],
        )?;
        registry.register(Box::new(reserved_capital_usd.clone()))?;

        let open_positions = Gauge::with_opts(Opts::new(
            "covenant_open_positions",
            "Number of open positions",
        ))?;
        registry.register(Box::new(open_positions.clone()))?;

        let open_orders = Gauge::with_opts(Opts::new(
            "covenant_open_orders",
            "Number of non-terminal orders",
        ))?;
        registry.register(Box::new(open_orders.clone()))?;

        let audit_records_total = CounterVec::new(
            Opts::new("covenant_audit_records_total", "Audit records by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(audit_records_total.clone()))?;

        let rule_evaluations_total = CounterVec::new(
            Opts::new(
                "covenant_rule_evaluations_total",
                "Rule evaluations by verdict",
            ),
            &["verdict"],
        )?;
        registry.register(Box::new(rule_evaluations_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "covenant_uptime_seconds",
            "Seconds since engine start",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = Gauge::with_opts(Opts::new(
            "covenant_health_status",
            "Overall health: 0 healthy, 1 degraded, 2 error",
        ))?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            account_value_usd,
            reserved_capital_usd,
            open_positions,
            open_orders,
            audit_records_total,
            rule_evaluations_total,
            uptime_seconds,
            health_status,
        })
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
