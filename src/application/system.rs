//! The orchestrator: constructs every component in dependency order, owns
//! their handles for the process lifetime, routes cross-component events,
//! runs the health loop, and drives startup and drain-then-stop shutdown.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, sleep, timeout};
use tracing::{error, info, warn};

use crate::application::accounts::{AccountManager, AccountManagerHandle};
use crate::application::atr_service::{AtrRequest, AtrService};
use crate::application::execution::{
    ExecutionConfig, ExecutionEngine, ExecutionEvent, ExecutionHandle,
};
use crate::application::health::{ComponentHealth, HealthRegistry};
use crate::application::hedging::HedgeCoordinator;
use crate::application::market_data::{AlertThresholds, FreshnessPolicy, MarketDataManager};
use crate::application::protocol::{ProtocolEngine, ProtocolEvent, RollEconomics, assess_roll};
use crate::application::rules_engine::RulesEngine;
use crate::config::Settings;
use crate::domain::accounts::{Account, AccountState};
use crate::domain::atr::AtrMethod;
use crate::domain::audit::{AuditEvent, AuditFilter, AuditKind, AuditRecord};
use crate::domain::constitution::Constitution;
use crate::domain::errors::{AuditError, CommandError, ConstitutionError};
use crate::domain::orders::{Order, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::domain::positions::{CONTRACT_MULTIPLIER, Position, PositionStatus};
use crate::domain::ports::{BarSource, BrokerAdapter, QuoteSource};
use crate::domain::protocol::ProtocolLevel;
use crate::domain::rules::action::{
    CapitalSnapshot, ClosePositionAction, CloseReason, LiquiditySnapshot, OpenPositionAction,
    RollPositionAction,
};
use crate::domain::rules::{Decision, ProposedAction};
use crate::domain::types::{HealthStatus, PositionId, Sleeve, StrategyKind, SystemPosture};
use crate::infrastructure::persistence::audit_log::AuditLog;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::replay;

const ACTOR: &str = "orchestrator";

/// External adapters the core consumes, injected at build time.
pub struct Adapters {
    pub broker: Arc<dyn BrokerAdapter>,
    pub quote_sources: Vec<Arc<dyn QuoteSource>>,
    pub bar_sources: Vec<Arc<dyn BarSource>>,
    pub avg_daily_volumes: HashMap<String, i64>,
}

/// A proposed weekly open, as constructed by the boundary (strike and delta
/// selection against an option chain happens outside the core).
#[derive(Debug, Clone)]
pub struct OpenPositionRequest {
    pub client_order_id: String,
    pub sleeve: Sleeve,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub delta: Decimal,
    pub dte: u32,
    pub stress_mode: bool,
    pub contracts: i64,
    pub strike: Decimal,
    pub option_mid: Decimal,
    pub liquidity: LiquiditySnapshot,
}

#[derive(Debug, Clone)]
struct OpenIntent {
    position_id: PositionId,
    sleeve: Sleeve,
    symbol: String,
    strategy: StrategyKind,
    strike: Decimal,
    expiry: chrono::NaiveDate,
    contracts: i64,
    atr_at_entry: Decimal,
    reserved: Decimal,
}

#[derive(Debug, Clone)]
struct CloseIntent {
    position_id: PositionId,
    status: PositionStatus,
    entry_price: Decimal,
    quantity: i64,
}

type IntentMap<T> = Arc<Mutex<HashMap<String, T>>>;

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub posture: SystemPosture,
    pub overall: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub audit_flushed_through: i64,
    pub accounts: usize,
    pub open_positions: usize,
    pub open_orders: usize,
    pub constitution_version: String,
}

pub struct Application {
    settings: Settings,
    constitution: Arc<Constitution>,
    audit: AuditLog,
    rules: Arc<RulesEngine>,
    atr: Arc<AtrService>,
    market_data: Arc<MarketDataManager>,
    protocol: Arc<ProtocolEngine>,
    protocol_events: mpsc::Receiver<ProtocolEvent>,
    accounts: AccountManagerHandle,
    account_manager: Option<AccountManager>,
    execution: ExecutionHandle,
    execution_events: mpsc::Receiver<ExecutionEvent>,
    broker: Arc<dyn BrokerAdapter>,
    health: Arc<HealthRegistry>,
    posture_tx: watch::Sender<SystemPosture>,
    posture_rx: watch::Receiver<SystemPosture>,
    shutdown_tx: watch::Sender<bool>,
}

impl Application {
    /// Construct components in dependency order: Constitution and audit
    /// first, then data services, then the decision and execution stack.
    pub async fn build(
        settings: Settings,
        constitution: Constitution,
        adapters: Adapters,
    ) -> anyhow::Result<Self> {
        info!("Building covenant engine (constitution v{})...", constitution.version());
        let constitution = Arc::new(constitution);
        let health = Arc::new(HealthRegistry::new());

        // C2: audit log over durable storage.
        let db = Database::new(&settings.database_url).await?;
        let audit = AuditLog::open(&db, constitution.version(), settings.audit_queue_depth).await?;

        // C3: ATR service over the ordered bar sources.
        let atr = Arc::new(AtrService::new(
            adapters.bar_sources,
            settings.atr_cache_ttl,
            settings.atr_fetch_timeout,
            audit.clone(),
        ));

        // C7: market data distribution. The VIX feed drives posture.
        let mut symbols = settings.symbols.clone();
        if !symbols.iter().any(|s| s == "VIX") {
            symbols.push("VIX".to_string());
        }
        let market_data = Arc::new(MarketDataManager::start(
            adapters.quote_sources,
            symbols,
            adapters.avg_daily_volumes,
            AlertThresholds::default(),
            FreshnessPolicy {
                market_hours: settings.quote_freshness_market_hours,
                off_hours: settings.quote_freshness_off_hours,
                ..FreshnessPolicy::default()
            },
            audit.clone(),
            settings.market_queue_depth,
        ));

        // C4: the constitutional validator.
        let rules = Arc::new(RulesEngine::new(constitution.clone(), audit.clone()));

        // C5: protocol engine.
        let (protocol_event_tx, protocol_events) = mpsc::channel(settings.market_queue_depth);
        let protocol = Arc::new(ProtocolEngine::new(
            constitution.protocol().clone(),
            atr.clone(),
            audit.clone(),
            protocol_event_tx,
        ));

        // C6: account manager.
        let (posture_tx, posture_rx) = watch::channel(SystemPosture::Safe);
        let (account_manager, accounts) = AccountManager::new(
            rules.clone(),
            audit.clone(),
            adapters.broker.clone(),
            posture_rx.clone(),
            health.clone(),
            settings.risk_free_rate,
            settings.reconcile_tolerance,
            settings.audit_queue_depth,
        );

        // C8: execution engine.
        let (execution, execution_events) = ExecutionEngine::start(
            rules.clone(),
            adapters.broker.clone(),
            audit.clone(),
            health.clone(),
            ExecutionConfig {
                submit_queue_depth: settings.submit_queue_depth,
                max_orders_per_minute: settings.max_orders_per_minute,
                order_submit_timeout: settings.order_submit_timeout,
                order_fill_deadline: settings.order_fill_deadline,
            },
        );

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            settings,
            constitution,
            audit,
            rules,
            atr,
            market_data,
            protocol,
            protocol_events,
            accounts,
            account_manager: Some(account_manager),
            execution,
            execution_events,
            broker: adapters.broker,
            health,
            posture_tx,
            posture_rx,
            shutdown_tx,
        })
    }

    /// Start every task, stamp the run, reconcile, and hand back the
    /// command surface.
    pub async fn start(mut self) -> anyhow::Result<SystemHandle> {
        self.audit
            .append(
                AuditEvent::new(AuditKind::SystemStart, ACTOR)
                    .with_payload(json!({ "mode": format!("{:?}", self.settings.mode) }))
                    .with_constitution_version(self.constitution.version()),
            )
            .await?;

        // A durable log may carry open positions from a prior run; they are
        // surfaced here and arbitrated by broker reconciliation below.
        let recovered = replay::rebuild_open_positions(&self.audit).await?;
        if !recovered.is_empty() {
            warn!(
                "Orchestrator: {} open positions on the log tail from a prior run",
                recovered.len()
            );
        }

        let account_manager = self.account_manager.take().expect("start called twice");
        tokio::spawn(account_manager.run());

        self.accounts.bootstrap(self.settings.total_capital).await?;

        timeout(self.settings.broker_connect_timeout, self.broker.connect())
            .await
            .map_err(|_| anyhow::anyhow!("broker connect timed out"))??;

        // SAFE -> ACTIVE requires a clean reconciliation; on mismatch the
        // system stays SAFE and the operator sees why on the audit trail.
        match self.accounts.reconcile().await {
            Ok(()) => {
                let _ = self.posture_tx.send(SystemPosture::Active);
                info!("Orchestrator: reconciliation clean, system ACTIVE");
            }
            Err(e) => {
                warn!("Orchestrator: staying SAFE, reconciliation failed: {}", e);
            }
        }

        let pending_opens: IntentMap<OpenIntent> = Arc::new(Mutex::new(HashMap::new()));
        let pending_closes: IntentMap<CloseIntent> = Arc::new(Mutex::new(HashMap::new()));

        let router = Router {
            protocol_events: self.protocol_events,
            execution_events: self.execution_events,
            accounts: self.accounts.clone(),
            execution: self.execution.clone(),
            protocol: self.protocol.clone(),
            market_data: self.market_data.clone(),
            audit: self.audit.clone(),
            pending_opens: pending_opens.clone(),
            pending_closes: pending_closes.clone(),
            exit_retry_deadline: self.settings.exit_retry_deadline,
            shutdown: self.shutdown_tx.subscribe(),
        };
        tokio::spawn(router.run());

        if let Some(vix) = self.market_data.latest("VIX") {
            let coordinator = HedgeCoordinator {
                vix,
                posture_tx: self.posture_tx.clone(),
                rules: self.rules.clone(),
                execution: self.execution.clone(),
                accounts: self.accounts.clone(),
                audit: self.audit.clone(),
                premium_estimate: self.settings.hedge_premium_estimate,
                shutdown: self.shutdown_tx.subscribe(),
                hedge_book: Decimal::ZERO,
            };
            tokio::spawn(coordinator.run());
        }

        // Periodic ATR refresh keeps the cache warm for symbols carrying
        // open positions, so monitor ticks read cached values.
        {
            let atr = self.atr.clone();
            let accounts = self.accounts.clone();
            let constitution = self.constitution.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(6 * 3600));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tick.tick() => {}
                    }
                    let positions = accounts.positions_snapshot().await;
                    let mut symbols: Vec<String> = positions
                        .iter()
                        .filter(|p| p.is_open())
                        .map(|p| p.symbol.clone())
                        .collect();
                    symbols.sort();
                    symbols.dedup();
                    let as_of = Utc::now().date_naive();
                    let refreshes = symbols.iter().map(|symbol| {
                        let request = AtrRequest {
                            symbol: symbol.clone(),
                            period: constitution.protocol().atr_period,
                            method: AtrMethod::Wilder,
                            window_days: 30,
                            as_of,
                            allow_fallback: false,
                        };
                        let atr = atr.clone();
                        async move { (request.symbol.clone(), atr.compute(&request).await) }
                    });
                    for (symbol, result) in futures::future::join_all(refreshes).await {
                        if let Err(e) = result {
                            warn!("AtrRefresh: {} failed: {}", symbol, e);
                        }
                    }
                }
            });
        }

        let health_loop = HealthLoop {
            health: self.health.clone(),
            market_data: self.market_data.clone(),
            accounts: self.accounts.clone(),
            audit: self.audit.clone(),
            posture_tx: self.posture_tx.clone(),
            freshness: self.settings.quote_freshness_market_hours,
            shutdown: self.shutdown_tx.subscribe(),
        };
        tokio::spawn(health_loop.run());

        info!("Covenant engine running.");
        Ok(SystemHandle {
            settings: self.settings,
            constitution: self.constitution,
            audit: self.audit,
            rules: self.rules,
            atr: self.atr,
            market_data: self.market_data,
            protocol: self.protocol,
            accounts: self.accounts,
            execution: self.execution,
            health: self.health,
            posture: self.posture_rx,
            shutdown_tx: self.shutdown_tx,
            pending_opens,
            pending_closes,
        })
    }
}

/// The command surface the orchestrator exposes to external collaborators.
/// Queries are snapshot-consistent; commands return structured errors.
#[derive(Clone)]
pub struct SystemHandle {
    settings: Settings,
    constitution: Arc<Constitution>,
    audit: AuditLog,
    rules: Arc<RulesEngine>,
    atr: Arc<AtrService>,
    market_data: Arc<MarketDataManager>,
    protocol: Arc<ProtocolEngine>,
    accounts: AccountManagerHandle,
    execution: ExecutionHandle,
    health: Arc<HealthRegistry>,
    posture: watch::Receiver<SystemPosture>,
    shutdown_tx: watch::Sender<bool>,
    pending_opens: IntentMap<OpenIntent>,
    pending_closes: IntentMap<CloseIntent>,
}

impl SystemHandle {
    pub fn posture(&self) -> SystemPosture {
        *self.posture.borrow()
    }

    pub fn constitution(&self) -> &Constitution {
        &self.constitution
    }

    pub fn accounts(&self) -> &AccountManagerHandle {
        &self.accounts
    }

    pub fn execution(&self) -> &ExecutionHandle {
        &self.execution
    }

    pub fn market_data(&self) -> &MarketDataManager {
        &self.market_data
    }

    pub fn protocol(&self) -> &ProtocolEngine {
        &self.protocol
    }

    pub async fn status(&self) -> SystemStatus {
        let now = Utc::now();
        let accounts = self.accounts.snapshot().await;
        let positions = self.accounts.positions_snapshot().await;
        let open_orders = self.execution.open_orders().await;
        SystemStatus {
            posture: self.posture(),
            overall: self.health.overall(now),
            components: self.health.probe(now),
            audit_flushed_through: self.audit.flushed_through(),
            accounts: accounts.len(),
            open_positions: positions.iter().filter(|p| p.is_open()).count(),
            open_orders: open_orders.len(),
            constitution_version: self.constitution.version().to_string(),
        }
    }

    pub async fn snapshot_accounts(&self) -> Vec<Account> {
        self.accounts.snapshot().await
    }

    pub async fn snapshot_positions(&self) -> Vec<Position> {
        self.accounts.positions_snapshot().await
    }

    pub async fn snapshot_orders(&self) -> Vec<Order> {
        self.execution.orders_snapshot().await
    }

    pub async fn query_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        self.audit.query(filter, limit).await
    }

    /// Evaluate an arbitrary proposed action without executing anything.
    pub async fn evaluate_action(&self, action: &ProposedAction) -> Result<Decision, AuditError> {
        self.rules.evaluate(action).await
    }

    /// The Constitution is immutable per process run.
    pub fn reload_constitution(&self) -> Result<(), ConstitutionError> {
        Err(ConstitutionError::Immutable)
    }

    /// Propose a weekly short-option open. The decision flow is: this call
    /// assembles the typed action, the Rules Engine decides, and only an
    /// approved action reaches the venue.
    pub async fn open_position(&self, request: OpenPositionRequest) -> Result<Order, CommandError> {
        let accounts = self.accounts.snapshot().await;
        let account = accounts
            .iter()
            .filter(|a| a.sleeve == request.sleeve)
            .max_by_key(|a| (a.state == AccountState::Active, a.available_capital()))
            .cloned()
            .ok_or(CommandError::Rules(
                crate::domain::errors::RulesError::UnknownSleeve {
                    name: request.sleeve.to_string(),
                },
            ))?;

        let positions = self.accounts.positions_snapshot().await;
        let symbol_notional: Decimal = positions
            .iter()
            .filter(|p| p.account_id == account.id && p.symbol == request.symbol && p.is_open())
            .map(|p| p.notional())
            .sum();

        let now = Utc::now();
        let action = OpenPositionAction {
            account_id: account.id,
            account_state: account.state,
            sleeve: request.sleeve,
            symbol: request.symbol.clone(),
            strategy: request.strategy,
            delta: request.delta,
            dte: request.dte,
            stress_mode: request.stress_mode,
            contracts: request.contracts,
            strike: request.strike,
            option_mid: request.option_mid,
            proposed_at: now,
            liquidity: request.liquidity.clone(),
            capital: CapitalSnapshot {
                sleeve_capital: account.current_value,
                deployed_notional: account.reserved_capital,
                symbol_notional,
                margin_used: Decimal::ZERO,
            },
        };

        let atr_at_entry = {
            let atr_request = AtrRequest {
                symbol: request.symbol.clone(),
                period: self.constitution.protocol().atr_period,
                method: AtrMethod::Wilder,
                window_days: 30,
                as_of: now.date_naive(),
                allow_fallback: true,
            };
            match self.atr.compute(&atr_request).await {
                Ok(value) => value.value,
                Err(e) => {
                    warn!("open_position: ATR unavailable for {}: {}", request.symbol, e);
                    Decimal::ZERO
                }
            }
        };

        let reserved = request.strike * Decimal::from(request.contracts) * CONTRACT_MULTIPLIER;
        let intent = OpenIntent {
            position_id: PositionId::generate(),
            sleeve: request.sleeve,
            symbol: request.symbol.clone(),
            strategy: request.strategy,
            strike: request.strike,
            expiry: now.date_naive() + chrono::Duration::days(request.dte as i64),
            contracts: request.contracts,
            atr_at_entry,
            reserved,
        };
        self.pending_opens
            .lock()
            .await
            .insert(request.client_order_id.clone(), intent);

        let order_request = OrderRequest {
            client_order_id: request.client_order_id.clone(),
            account_id: account.id,
            position_id: None,
            symbol: request.symbol,
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            quantity: request.contracts,
            limit_price: Some(request.option_mid),
            stop_price: None,
            time_in_force: TimeInForce::Day,
        };

        let order = self
            .execution
            .submit(order_request, ProposedAction::OpenPosition(action))
            .await?;
        if order.status == OrderStatus::Rejected {
            self.pending_opens.lock().await.remove(&request.client_order_id);
        }
        Ok(order)
    }

    /// Close an open position. The reason decides the terminal status the
    /// position is booked with.
    pub async fn close_position(
        &self,
        position_id: PositionId,
        reason: CloseReason,
    ) -> Result<Order, CommandError> {
        let positions = self.accounts.positions_snapshot().await;
        let position = positions
            .iter()
            .find(|p| p.id == position_id && p.is_open())
            .cloned()
            .ok_or(CommandError::UnknownPosition { id: position_id })?;
        let account = self
            .accounts
            .snapshot()
            .await
            .into_iter()
            .find(|a| a.id == position.account_id)
            .ok_or(CommandError::Account(
                crate::domain::errors::AccountError::Unknown {
                    id: position.account_id,
                },
            ))?;

        let status = match reason {
            CloseReason::Expiry => PositionStatus::Expired,
            CloseReason::Assignment => PositionStatus::Assigned,
            _ => PositionStatus::Closed,
        };
        submit_close(
            &self.execution,
            &self.pending_closes,
            &position,
            &account,
            reason,
            status,
            format!("close-{}-{}", position_id, uuid::Uuid::new_v4()),
        )
        .await
    }

    /// Roll economics for an open short position: remaining credit, net
    /// roll cost, and whether the cost threshold forces an exit instead.
    pub async fn assess_roll(
        &self,
        position_id: PositionId,
        cost_to_close: Decimal,
        new_open_credit: Decimal,
    ) -> Result<RollEconomics, CommandError> {
        let positions = self.accounts.positions_snapshot().await;
        let position = positions
            .iter()
            .find(|p| p.id == position_id && p.is_open())
            .ok_or(CommandError::UnknownPosition { id: position_id })?;
        Ok(assess_roll(
            position.opening_premium(),
            cost_to_close,
            new_open_credit,
            self.constitution.protocol().roll_cost_threshold,
        ))
    }

    /// Roll decision: approved rolls close the old leg with ROLLED status
    /// (the new leg is proposed separately through `open_position`); a roll
    /// breaching the cost threshold forces an L3 exit instead.
    pub async fn roll_position(
        &self,
        position_id: PositionId,
        new_delta: Decimal,
        new_dte: u32,
        remaining_credit: Decimal,
        roll_cost: Decimal,
    ) -> Result<Decision, CommandError> {
        let positions = self.accounts.positions_snapshot().await;
        let position = positions
            .iter()
            .find(|p| p.id == position_id && p.is_open())
            .cloned()
            .ok_or(CommandError::UnknownPosition { id: position_id })?;

        let account_sleeve = self
            .accounts
            .snapshot()
            .await
            .into_iter()
            .find(|a| a.id == position.account_id)
            .map(|a| a.sleeve)
            .ok_or(CommandError::Account(
                crate::domain::errors::AccountError::Unknown {
                    id: position.account_id,
                },
            ))?;

        let action = ProposedAction::RollPosition(RollPositionAction {
            account_id: position.account_id,
            position_id,
            sleeve: account_sleeve,
            symbol: position.symbol.clone(),
            strategy: position.strategy,
            new_delta,
            new_dte,
            remaining_credit,
            roll_cost,
        });
        let decision = self.rules.evaluate(&action).await?;

        if decision.is_rejected() {
            // Forbidden roll: force L3 and exit.
            self.protocol.force_exit(position_id).await;
            self.close_position(position_id, CloseReason::ProtocolExit).await?;
        } else {
            self.close_position_as(position_id, PositionStatus::Rolled).await?;
        }
        Ok(decision)
    }

    async fn close_position_as(
        &self,
        position_id: PositionId,
        status: PositionStatus,
    ) -> Result<Order, CommandError> {
        let positions = self.accounts.positions_snapshot().await;
        let position = positions
            .iter()
            .find(|p| p.id == position_id && p.is_open())
            .cloned()
            .ok_or(CommandError::UnknownPosition { id: position_id })?;
        let account = self
            .accounts
            .snapshot()
            .await
            .into_iter()
            .find(|a| a.id == position.account_id)
            .ok_or(CommandError::Account(
                crate::domain::errors::AccountError::Unknown {
                    id: position.account_id,
                },
            ))?;

        let reason = match status {
            PositionStatus::Expired => CloseReason::Expiry,
            PositionStatus::Assigned => CloseReason::Assignment,
            _ => CloseReason::Operator,
        };
        submit_close(
            &self.execution,
            &self.pending_closes,
            &position,
            &account,
            reason,
            status,
            format!("roll-{}-{}", position_id, uuid::Uuid::new_v4()),
        )
        .await
    }

    /// Drain and stop: signal every component, wait for open orders to
    /// clear within the deadline, force-stop after twice the deadline.
    pub async fn stop(&self) {
        info!("Orchestrator: stopping...");
        if let Err(e) = self
            .audit
            .append(AuditEvent::new(AuditKind::SystemStop, ACTOR))
            .await
        {
            warn!("Orchestrator: stop audit failed: {}", e);
        }
        let _ = self.shutdown_tx.send(true);
        self.protocol.shutdown().await;

        let deadline = self.settings.drain_deadline;
        let drained = timeout(deadline, async {
            loop {
                if self.execution.open_orders().await.is_empty() {
                    return;
                }
                sleep(Duration::from_millis(250)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "Orchestrator: open orders after {:?}, waiting one more deadline before force-stop",
                deadline
            );
            let _ = timeout(deadline, async {
                loop {
                    if self.execution.open_orders().await.is_empty() {
                        return;
                    }
                    sleep(Duration::from_millis(250)).await;
                }
            })
            .await;
        }
        info!("Orchestrator: stopped.");
    }
}

async fn submit_close(
    execution: &ExecutionHandle,
    pending_closes: &IntentMap<CloseIntent>,
    position: &Position,
    account: &Account,
    reason: CloseReason,
    status: PositionStatus,
    client_order_id: String,
) -> Result<Order, CommandError> {
    pending_closes.lock().await.insert(
        client_order_id.clone(),
        CloseIntent {
            position_id: position.id,
            status,
            entry_price: position.entry_price,
            quantity: position.quantity,
        },
    );

    let action = ProposedAction::ClosePosition(ClosePositionAction {
        account_id: account.id,
        position_id: position.id,
        sleeve: account.sleeve,
        symbol: position.symbol.clone(),
        strategy: position.strategy,
        reason,
    });
    let request = OrderRequest {
        client_order_id: client_order_id.clone(),
        account_id: account.id,
        position_id: Some(position.id),
        symbol: position.symbol.clone(),
        side: if position.quantity < 0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        },
        order_type: OrderType::Market,
        quantity: position.quantity.abs(),
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Day,
    };

    let order = execution.submit(request, action).await?;
    if order.status == OrderStatus::Rejected {
        pending_closes.lock().await.remove(&client_order_id);
    }
    Ok(order)
}

/// Routes protocol and execution events between components: fills become
/// bookings, escalations become exits with bounded retry.
struct Router {
    protocol_events: mpsc::Receiver<ProtocolEvent>,
    execution_events: mpsc::Receiver<ExecutionEvent>,
    accounts: AccountManagerHandle,
    execution: ExecutionHandle,
    protocol: Arc<ProtocolEngine>,
    market_data: Arc<MarketDataManager>,
    audit: AuditLog,
    pending_opens: IntentMap<OpenIntent>,
    pending_closes: IntentMap<CloseIntent>,
    exit_retry_deadline: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Router {
    async fn run(mut self) {
        info!("Router started.");
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("Router: shutdown");
                    return;
                }
                event = self.execution_events.recv() => {
                    let Some(event) = event else { return };
                    self.handle_execution_event(event).await;
                }
                event = self.protocol_events.recv() => {
                    let Some(event) = event else { return };
                    self.handle_protocol_event(event).await;
                }
            }
        }
    }

    async fn handle_execution_event(&mut self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::Filled { order } => {
                if let Some(intent) = self.pending_opens.lock().await.remove(&order.client_order_id) {
                    self.book_open(&order, intent).await;
                } else if let Some(intent) =
                    self.pending_closes.lock().await.remove(&order.client_order_id)
                {
                    self.book_close(&order, intent).await;
                }
            }
            ExecutionEvent::Rejected { order } | ExecutionEvent::Cancelled { order } => {
                self.pending_opens.lock().await.remove(&order.client_order_id);
                self.pending_closes.lock().await.remove(&order.client_order_id);
            }
            ExecutionEvent::Errored { order, reason } => {
                warn!("Router: order {} errored: {}", order.client_order_id, reason);
                self.pending_opens.lock().await.remove(&order.client_order_id);
                self.pending_closes.lock().await.remove(&order.client_order_id);
            }
            ExecutionEvent::PartiallyFilled { .. } => {}
        }
    }

    async fn book_open(&self, order: &Order, intent: OpenIntent) {
        let fill_price = order.avg_fill_price.unwrap_or(Decimal::ZERO);
        let position = Position {
            id: intent.position_id,
            account_id: order.account_id,
            symbol: intent.symbol.clone(),
            strategy: intent.strategy,
            // Short option inventory carries negative contract counts.
            quantity: -intent.contracts,
            strike: intent.strike,
            expiry: intent.expiry,
            entry_price: fill_price,
            current_price: fill_price,
            status: PositionStatus::Open,
            protocol_level: ProtocolLevel::L0,
            atr_at_entry: intent.atr_at_entry,
            opened_at: Utc::now(),
            closed_at: None,
        };

        if let Err(e) = self.accounts.open_booked(position.clone(), intent.reserved).await {
            error!("Router: booking open of {} failed: {}", order.client_order_id, e);
            return;
        }
        if let Some(underlying) = self.market_data.latest(&intent.symbol) {
            self.protocol.track(position, underlying, None).await;
        } else {
            warn!("Router: no quote feed for {}, position unmonitored", intent.symbol);
        }
        info!(
            "Router: booked open {} ({} {} @ {})",
            intent.position_id, intent.contracts, intent.symbol, fill_price
        );
    }

    async fn book_close(&self, order: &Order, intent: CloseIntent) {
        let fill_price = order.avg_fill_price.unwrap_or(Decimal::ZERO);
        // Realized P&L of the round trip, signed by the original inventory.
        let realized = (fill_price - intent.entry_price)
            * Decimal::from(intent.quantity)
            * CONTRACT_MULTIPLIER;

        self.protocol.untrack(intent.position_id).await;
        if let Err(e) = self
            .accounts
            .close_booked(intent.position_id, realized, intent.status)
            .await
        {
            error!("Router: booking close of {} failed: {}", intent.position_id, e);
            return;
        }
        info!(
            "Router: booked close {} ({} @ {}, realized {})",
            intent.position_id, intent.status, fill_price, realized
        );
    }

    async fn handle_protocol_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::ExitRequired { position_id, reason } => {
                info!("Router: exit required for {} ({})", position_id, reason);
                self.execute_exit(position_id).await;
            }
            ProtocolEvent::RollReady { position_id } => {
                // Roll parameters come from the boundary; the engine only
                // flags readiness.
                info!("Router: {} ready for roll preparation", position_id);
            }
            ProtocolEvent::Escalated { .. }
            | ProtocolEvent::DeEscalated { .. }
            | ProtocolEvent::DataStale { .. } => {}
        }
    }

    /// Exit with exponential backoff (1s doubling, capped at 30s) up to the
    /// policy deadline. On deadline the failure is audited and the L3
    /// pending action is preserved; nothing is silently dropped.
    async fn execute_exit(&self, position_id: PositionId) {
        let positions = self.accounts.positions_snapshot().await;
        let Some(position) = positions.iter().find(|p| p.id == position_id && p.is_open()).cloned()
        else {
            return;
        };
        let Some(account) = self
            .accounts
            .snapshot()
            .await
            .into_iter()
            .find(|a| a.id == position.account_id)
        else {
            return;
        };

        let deadline = Instant::now() + self.exit_retry_deadline;
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let client_order_id = format!("exit-{position_id}-{attempt}");
            let result = submit_close(
                &self.execution,
                &self.pending_closes,
                &position,
                &account,
                CloseReason::ProtocolExit,
                PositionStatus::Closed,
                client_order_id.clone(),
            )
            .await;

            match result {
                Ok(order) if !matches!(order.status, OrderStatus::Rejected | OrderStatus::Error) => {
                    return;
                }
                Ok(order) => {
                    warn!(
                        "Router: exit attempt {} for {} ended {}",
                        attempt, position_id, order.status
                    );
                }
                Err(e) => {
                    warn!("Router: exit attempt {} for {} failed: {}", attempt, position_id, e);
                }
            }

            if Instant::now() + delay > deadline {
                error!(
                    "Router: exit of {} failed within deadline; preserving L3 pending action",
                    position_id
                );
                let event = AuditEvent::new(AuditKind::OrderEvent, ACTOR)
                    .with_subject(position_id.to_string())
                    .with_payload(json!({ "note": "exit_failed", "attempts": attempt }));
                if let Err(e) = self.audit.append(event).await {
                    warn!("Router: audit failed: {}", e);
                }
                return;
            }
            sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(30));
        }
    }
}

/// Periodic health aggregation. A component in sticky ERROR moves the
/// system posture to SAFE when it is capital-critical.
struct HealthLoop {
    health: Arc<HealthRegistry>,
    market_data: Arc<MarketDataManager>,
    accounts: AccountManagerHandle,
    audit: AuditLog,
    posture_tx: watch::Sender<SystemPosture>,
    freshness: Duration,
    shutdown: watch::Receiver<bool>,
}

impl HealthLoop {
    async fn run(mut self) {
        // Beats land once per health tick, gated on the freshness probe.
        self.health.register("market_data", Duration::from_secs(30));
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return,
                _ = tick.tick() => {}
            }

            let now = Utc::now();

            // Real probe for market data: the freshest quote per symbol must
            // be inside the freshness threshold (or a degrade is on record).
            let fresh = self.market_data.symbols().iter().all(|symbol| {
                self.market_data
                    .quote_age(symbol, now)
                    .map(|age| age.num_milliseconds() <= (self.freshness.as_millis() as i64) * 2)
                    .unwrap_or(false)
            });
            if fresh {
                self.health.beat("market_data");
            }

            let components = self.health.probe(now);
            let overall = self.health.overall(now);
            if overall != HealthStatus::Healthy {
                warn!("HealthLoop: overall {}", overall);
                let event = AuditEvent::new(AuditKind::HealthCheck, ACTOR).with_payload(json!({
                    "overall": overall,
                    "components": components,
                }));
                if let Err(e) = self.audit.append(event).await {
                    warn!("HealthLoop: audit failed: {}", e);
                }
            }

            // Capital-critical failure drops the system to SAFE.
            let critical_error = components.iter().any(|c| {
                c.status == HealthStatus::Error
                    && matches!(c.name.as_str(), "account_manager" | "execution")
            });
            if critical_error && *self.posture_tx.borrow() != SystemPosture::Safe {
                error!("HealthLoop: critical component in ERROR, entering SAFE");
                let _ = self.posture_tx.send(SystemPosture::Safe);
                let moved = self.accounts.transition_all(AccountState::Safe).await;
                warn!("HealthLoop: {} accounts moved to SAFE", moved);
            }
        }
    }
}
