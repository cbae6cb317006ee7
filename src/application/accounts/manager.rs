//! The Account Manager task. It owns the account ledger and the position
//! subtree; every mutation arrives as a command on its channel and leaves a
//! record on the audit trail. Readers get consistent snapshots per call.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::application::accounts::attribution::{AttributionTracker, PerformanceReport};
use crate::application::accounts::consolidation::{self, ConsolidationOutcome};
use crate::application::accounts::forking;
use crate::application::health::HealthRegistry;
use crate::application::rules_engine::RulesEngine;
use crate::domain::accounts::{Account, AccountLedger, AccountState};
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::errors::AccountError;
use crate::domain::positions::{Position, PositionStatus};
use crate::domain::ports::BrokerAdapter;
use crate::domain::rules::ProposedAction;
use crate::domain::rules::action::{AccountTransitionAction, ForkAccountAction};
use crate::domain::types::{AccountId, PositionId, SystemPosture};
use crate::infrastructure::persistence::audit_log::AuditLog;

const ACTOR: &str = "account_manager";

#[derive(Debug, Clone)]
pub struct ForkOutcome {
    pub parent_id: AccountId,
    pub child_id: AccountId,
    pub transferred: Decimal,
    pub confidence: Decimal,
    pub seal_seq: i64,
}

pub enum AccountCommand {
    Bootstrap {
        total_capital: Decimal,
        reply: oneshot::Sender<Result<Vec<AccountId>, AccountError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Account>>,
    },
    PositionsSnapshot {
        reply: oneshot::Sender<Vec<Position>>,
    },
    Transition {
        account_id: AccountId,
        to: AccountState,
        reply: oneshot::Sender<Result<(), AccountError>>,
    },
    TransitionAll {
        to: AccountState,
        reply: oneshot::Sender<usize>,
    },
    OpenBooked {
        position: Position,
        reserved: Decimal,
        reply: oneshot::Sender<Result<(), AccountError>>,
    },
    CloseBooked {
        position_id: PositionId,
        realized_pnl: Decimal,
        status: PositionStatus,
        reply: oneshot::Sender<Result<(), AccountError>>,
    },
    MarkPosition {
        position_id: PositionId,
        mark: Decimal,
    },
    TryFork {
        account_id: AccountId,
        reply: oneshot::Sender<Result<Option<ForkOutcome>, AccountError>>,
    },
    Consolidate {
        child_id: AccountId,
        reply: oneshot::Sender<Result<ConsolidationOutcome, AccountError>>,
    },
    Reconcile {
        reply: oneshot::Sender<Result<(), AccountError>>,
    },
    Report {
        account_id: AccountId,
        aggregate: bool,
        reply: oneshot::Sender<Option<PerformanceReport>>,
    },
}

#[derive(Clone)]
pub struct AccountManagerHandle {
    tx: mpsc::Sender<AccountCommand>,
}

macro_rules! ask {
    ($self:expr, $variant:ident { $($field:ident : $value:expr),* $(,)? }) => {{
        let (reply, rx) = oneshot::channel();
        $self
            .tx
            .send(AccountCommand::$variant { $($field: $value,)* reply })
            .await
            .ok();
        rx.await.ok()
    }};
}

impl AccountManagerHandle {
    pub async fn bootstrap(&self, total_capital: Decimal) -> Result<Vec<AccountId>, AccountError> {
        ask!(self, Bootstrap { total_capital: total_capital })
            .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    pub async fn snapshot(&self) -> Vec<Account> {
        ask!(self, Snapshot {}).unwrap_or_default()
    }

    pub async fn positions_snapshot(&self) -> Vec<Position> {
        ask!(self, PositionsSnapshot {}).unwrap_or_default()
    }

    pub async fn transition(&self, account_id: AccountId, to: AccountState) -> Result<(), AccountError> {
        ask!(self, Transition { account_id: account_id, to: to })
            .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    /// Move every live account to the target state; returns how many moved.
    pub async fn transition_all(&self, to: AccountState) -> usize {
        ask!(self, TransitionAll { to: to }).unwrap_or(0)
    }

    pub async fn open_booked(&self, position: Position, reserved: Decimal) -> Result<(), AccountError> {
        ask!(self, OpenBooked { position: position, reserved: reserved })
            .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    pub async fn close_booked(
        &self,
        position_id: PositionId,
        realized_pnl: Decimal,
        status: PositionStatus,
    ) -> Result<(), AccountError> {
        ask!(self, CloseBooked {
            position_id: position_id,
            realized_pnl: realized_pnl,
            status: status
        })
        .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    pub async fn mark_position(&self, position_id: PositionId, mark: Decimal) {
        let _ = self
            .tx
            .send(AccountCommand::MarkPosition { position_id, mark })
            .await;
    }

    pub async fn try_fork(&self, account_id: AccountId) -> Result<Option<ForkOutcome>, AccountError> {
        ask!(self, TryFork { account_id: account_id })
            .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    pub async fn consolidate(&self, child_id: AccountId) -> Result<ConsolidationOutcome, AccountError> {
        ask!(self, Consolidate { child_id: child_id })
            .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    pub async fn reconcile(&self) -> Result<(), AccountError> {
        ask!(self, Reconcile {})
            .unwrap_or_else(|| Err(AccountError::Audit("account manager unavailable".into())))
    }

    pub async fn report(&self, account_id: AccountId, aggregate: bool) -> Option<PerformanceReport> {
        ask!(self, Report { account_id: account_id, aggregate: aggregate }).flatten()
    }
}

pub struct AccountManager {
    rx: mpsc::Receiver<AccountCommand>,
    ledger: AccountLedger,
    positions: HashMap<PositionId, Position>,
    reservations: HashMap<PositionId, Decimal>,
    attribution: AttributionTracker,
    rules: Arc<RulesEngine>,
    audit: AuditLog,
    broker: Arc<dyn BrokerAdapter>,
    posture: watch::Receiver<SystemPosture>,
    health: Arc<HealthRegistry>,
    reconcile_tolerance: Decimal,
}

impl AccountManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<RulesEngine>,
        audit: AuditLog,
        broker: Arc<dyn BrokerAdapter>,
        posture: watch::Receiver<SystemPosture>,
        health: Arc<HealthRegistry>,
        risk_free_rate: f64,
        reconcile_tolerance: Decimal,
        queue_depth: usize,
    ) -> (Self, AccountManagerHandle) {
        let (tx, rx) = mpsc::channel(queue_depth);
        health.register(ACTOR, Duration::from_secs(10));
        (
            Self {
                rx,
                ledger: AccountLedger::new(),
                positions: HashMap::new(),
                reservations: HashMap::new(),
                attribution: AttributionTracker::new(risk_free_rate),
                rules,
                audit,
                broker,
                posture,
                health,
                reconcile_tolerance,
            },
            AccountManagerHandle { tx },
        )
    }

    pub async fn run(mut self) {
        info!("AccountManager started.");
        let mut beat = tokio::time::interval(Duration::from_secs(5));
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = beat.tick() => {
                    self.health.beat(ACTOR);
                }
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        info!("AccountManager: command channel closed, stopping.");
                        return;
                    };
                    self.health.beat(ACTOR);
                    self.handle(command).await;
                }
            }
        }
    }

    async fn handle(&mut self, command: AccountCommand) {
        match command {
            AccountCommand::Bootstrap { total_capital, reply } => {
                let _ = reply.send(self.handle_bootstrap(total_capital).await);
            }
            AccountCommand::Snapshot { reply } => {
                let _ = reply.send(self.ledger.snapshot());
            }
            AccountCommand::PositionsSnapshot { reply } => {
                let mut positions: Vec<Position> = self.positions.values().cloned().collect();
                positions.sort_by_key(|p| p.opened_at);
                let _ = reply.send(positions);
            }
            AccountCommand::Transition { account_id, to, reply } => {
                let _ = reply.send(self.handle_transition(account_id, to).await);
            }
            AccountCommand::TransitionAll { to, reply } => {
                let mut moved = 0;
                let ids: Vec<AccountId> = self.ledger.iter().map(|a| a.id).collect();
                for id in ids {
                    let current = self.ledger.get(id).map(|a| a.state);
                    if matches!(current, Ok(state) if AccountState::transition_allowed(state, to) && state != to)
                        && self.handle_transition(id, to).await.is_ok()
                    {
                        moved += 1;
                    }
                }
                let _ = reply.send(moved);
            }
            AccountCommand::OpenBooked { position, reserved, reply } => {
                let _ = reply.send(self.handle_open_booked(position, reserved).await);
            }
            AccountCommand::CloseBooked { position_id, realized_pnl, status, reply } => {
                let _ = reply.send(self.handle_close_booked(position_id, realized_pnl, status).await);
            }
            AccountCommand::MarkPosition { position_id, mark } => {
                self.handle_mark(position_id, mark);
            }
            AccountCommand::TryFork { account_id, reply } => {
                let _ = reply.send(self.handle_fork(account_id).await);
            }
            AccountCommand::Consolidate { child_id, reply } => {
                let _ = reply.send(self.handle_consolidate(child_id).await);
            }
            AccountCommand::Reconcile { reply } => {
                let _ = reply.send(self.handle_reconcile().await);
            }
            AccountCommand::Report { account_id, aggregate, reply } => {
                let report = if aggregate {
                    let weights = self.subtree_weights(account_id);
                    self.attribution.aggregate(&weights)
                } else {
                    self.attribution.report(account_id)
                };
                let _ = reply.send(report);
            }
        }
    }

    async fn handle_bootstrap(&mut self, total: Decimal) -> Result<Vec<AccountId>, AccountError> {
        let now = Utc::now();
        let sleeves = self.rules.constitution().sleeves();
        let mut created = Vec::new();
        for sleeve in crate::domain::types::Sleeve::ALL {
            let capital = total * sleeves.ratio(sleeve);
            let account = Account::new(sleeve, capital, now);
            let id = self.ledger.insert(account)?;
            created.push(id);
            self.attribution.record_equity(id, now, capital);
            self.append_audit(
                AuditEvent::new(AuditKind::AccountTransition, ACTOR)
                    .with_subject(id.to_string())
                    .with_payload(json!({
                        "created": sleeve.to_string(),
                        "initial_capital": capital.to_string(),
                        "state": AccountState::Safe.to_string(),
                    })),
            )
            .await?;
        }
        info!(
            "AccountManager: bootstrapped {} sleeve accounts from ${}",
            created.len(),
            total
        );
        Ok(created)
    }

    async fn handle_transition(
        &mut self,
        account_id: AccountId,
        to: AccountState,
    ) -> Result<(), AccountError> {
        let from = self.ledger.get(account_id)?.state;
        let action = ProposedAction::AccountTransition(AccountTransitionAction {
            account_id,
            from,
            to,
        });
        let decision = self
            .rules
            .evaluate(&action)
            .await
            .map_err(|e| AccountError::Audit(e.to_string()))?;
        if decision.is_rejected() {
            return Err(AccountError::InvalidTransition {
                id: account_id,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        self.ledger.get_mut(account_id)?.transition(to, now)?;
        self.append_audit(
            AuditEvent::new(AuditKind::AccountTransition, ACTOR)
                .with_subject(account_id.to_string())
                .with_payload(json!({ "from": from.to_string(), "to": to.to_string() })),
        )
        .await?;
        Ok(())
    }

    async fn handle_open_booked(
        &mut self,
        position: Position,
        reserved: Decimal,
    ) -> Result<(), AccountError> {
        let now = Utc::now();
        let account_id = position.account_id;
        {
            let account = self.ledger.get_mut(account_id)?;
            account.reserve(reserved, now)?;
            account.position_ids.push(position.id);
        }
        self.reservations.insert(position.id, reserved);
        self.positions.insert(position.id, position.clone());
        // The full entity rides on the record so a restart can rebuild the
        // open-position set from the log tail.
        self.append_audit(
            AuditEvent::new(AuditKind::PositionEvent, ACTOR)
                .with_subject(position.id.to_string())
                .with_payload(json!({
                    "note": "opened",
                    "position": serde_json::to_value(&position).unwrap_or_default(),
                    "reserved": reserved.to_string(),
                })),
        )
        .await?;
        self.record_equity(account_id);
        self.check_invariants(account_id).await
    }

    async fn handle_close_booked(
        &mut self,
        position_id: PositionId,
        realized_pnl: Decimal,
        status: PositionStatus,
    ) -> Result<(), AccountError> {
        let now = Utc::now();
        let account_id = {
            let position = self.positions.get_mut(&position_id).ok_or_else(|| {
                AccountError::InvariantViolation {
                    id: AccountId(uuid::Uuid::nil()),
                    detail: format!("close of unknown position {position_id}"),
                }
            })?;
            position.close(status, now);
            position.account_id
        };

        let released = self.reservations.remove(&position_id).unwrap_or(Decimal::ZERO);
        {
            let account = self.ledger.get_mut(account_id)?;
            if released > Decimal::ZERO {
                account.release(released, now)?;
            }
            account.current_value += realized_pnl;
            account.realized_premium += realized_pnl;
            account.position_ids.retain(|id| *id != position_id);
        }
        self.attribution.record_trade(account_id, realized_pnl);
        self.append_audit(
            AuditEvent::new(AuditKind::PositionEvent, ACTOR)
                .with_subject(position_id.to_string())
                .with_payload(json!({
                    "note": "closed",
                    "status": status.to_string(),
                    "realized_pnl": realized_pnl.to_string(),
                })),
        )
        .await?;
        self.record_equity(account_id);
        self.check_invariants(account_id).await
    }

    fn handle_mark(&mut self, position_id: PositionId, mark: Decimal) {
        if let Some(position) = self.positions.get_mut(&position_id) {
            position.current_price = mark;
            let account_id = position.account_id;
            self.record_equity(account_id);
        }
    }

    /// The journaled fork transaction: every step before the seal is
    /// reversible; the `fork_sealed` record commits it.
    async fn handle_fork(&mut self, account_id: AccountId) -> Result<Option<ForkOutcome>, AccountError> {
        let account = self.ledger.get(account_id)?.clone();
        let policy = self.rules.constitution().sleeve(account.sleeve);
        let posture = *self.posture.borrow();
        let win_rate = self.attribution.win_rate(account_id);

        let Some(opportunity) = forking::assess(&account, policy, posture, win_rate) else {
            return Ok(None);
        };

        let action = ProposedAction::ForkAccount(ForkAccountAction {
            account_id,
            sleeve: account.sleeve,
            account_state: account.state,
            current_value: account.current_value,
            fork_in_progress: account.state == AccountState::Forking,
            fork_count: account.fork_count,
            confidence: opportunity.confidence,
        });
        let decision = self
            .rules
            .evaluate(&action)
            .await
            .map_err(|e| AccountError::Audit(e.to_string()))?;
        if decision.is_rejected() {
            info!("AccountManager: fork of {} rejected by rules", account_id);
            return Ok(None);
        }

        let amount = opportunity.recommended_amount;
        let now = Utc::now();

        self.ledger
            .get_mut(account_id)?
            .transition(AccountState::Forking, now)?;
        self.append_audit(
            AuditEvent::new(AuditKind::AccountTransition, ACTOR)
                .with_subject(account_id.to_string())
                .with_payload(json!({ "from": "ACTIVE", "to": "FORKING" })),
        )
        .await?;

        if let Err(e) = self.ledger.get_mut(account_id)?.reserve(amount, now) {
            self.release_fork(account_id, Decimal::ZERO, &e).await;
            return Err(e);
        }
        self.append_audit(
            AuditEvent::new(AuditKind::ForkReserved, ACTOR)
                .with_subject(account_id.to_string())
                .with_payload(json!({ "amount": amount.to_string() })),
        )
        .await?;

        let child = Account::child_of(self.ledger.get(account_id)?, amount, now);
        let child_id = match self.ledger.insert(child) {
            Ok(id) => id,
            Err(e) => {
                self.release_fork(account_id, amount, &e).await;
                return Err(e);
            }
        };

        {
            let parent = self.ledger.get_mut(account_id)?;
            parent.release(amount, now)?;
            parent.current_value -= amount;
            parent.fork_count += 1;
        }

        let seal = self
            .append_audit(
                AuditEvent::new(AuditKind::ForkSealed, ACTOR)
                    .with_subject(account_id.to_string())
                    .with_subject(child_id.to_string())
                    .with_clause(crate::domain::constitution::sleeves::fork_clause(account.sleeve))
                    .with_payload(json!({
                        "amount": amount.to_string(),
                        "confidence": opportunity.confidence.to_string(),
                    })),
            )
            .await?;

        self.ledger
            .get_mut(account_id)?
            .transition(AccountState::Active, now)?;
        self.append_audit(
            AuditEvent::new(AuditKind::AccountTransition, ACTOR)
                .with_subject(account_id.to_string())
                .with_payload(json!({ "from": "FORKING", "to": "ACTIVE" })),
        )
        .await?;
        self.attribution
            .record_equity(child_id, now, amount);
        self.record_equity(account_id);

        info!(
            "AccountManager: forked {} -> {} (${} transferred)",
            account_id, child_id, amount
        );
        Ok(Some(ForkOutcome {
            parent_id: account_id,
            child_id,
            transferred: amount,
            confidence: opportunity.confidence,
            seal_seq: seal,
        }))
    }

    /// Unwind a fork that failed before its seal.
    async fn release_fork(&mut self, account_id: AccountId, reserved: Decimal, cause: &AccountError) {
        warn!("AccountManager: releasing failed fork of {}: {}", account_id, cause);
        let now = Utc::now();
        if let Ok(parent) = self.ledger.get_mut(account_id) {
            if reserved > Decimal::ZERO {
                let _ = parent.release(reserved, now);
            }
            let _ = parent.transition(AccountState::Active, now);
        }
        let _ = self
            .append_audit(
                AuditEvent::new(AuditKind::ForkReleased, ACTOR)
                    .with_subject(account_id.to_string())
                    .with_payload(json!({ "cause": cause.to_string() })),
            )
            .await;
    }

    async fn handle_consolidate(
        &mut self,
        child_id: AccountId,
    ) -> Result<ConsolidationOutcome, AccountError> {
        let parent_id = self
            .ledger
            .get(child_id)?
            .parent_id
            .ok_or(AccountError::InvariantViolation {
                id: child_id,
                detail: "consolidation target has no parent".to_string(),
            })?;

        self.handle_transition(parent_id, AccountState::Merging).await?;

        let now = Utc::now();
        let outcome = match consolidation::consolidate(
            &mut self.ledger,
            &mut self.positions,
            child_id,
            now,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.handle_transition(parent_id, AccountState::Active).await;
                return Err(e);
            }
        };

        self.append_audit(
            AuditEvent::new(AuditKind::ConsolidationSealed, ACTOR)
                .with_subject(parent_id.to_string())
                .with_subject(child_id.to_string())
                .with_payload(json!({
                    "transferred": outcome.transferred.to_string(),
                    "repointed": outcome.repointed_positions.len(),
                })),
        )
        .await?;

        self.handle_transition(parent_id, AccountState::Active).await?;
        self.record_equity(parent_id);
        Ok(outcome)
    }

    /// SAFE -> ACTIVE gate: the internal ledger must match the broker's view
    /// of positions and cash before any account re-arms.
    async fn handle_reconcile(&mut self) -> Result<(), AccountError> {
        let broker_positions = self.broker.positions().await.map_err(|e| {
            AccountError::ReconciliationMismatch {
                id: AccountId(uuid::Uuid::nil()),
                detail: format!("broker positions unavailable: {e}"),
            }
        })?;
        let balances = self.broker.balances().await.map_err(|e| {
            AccountError::ReconciliationMismatch {
                id: AccountId(uuid::Uuid::nil()),
                detail: format!("broker balances unavailable: {e}"),
            }
        })?;

        let mut mismatches: Vec<String> = Vec::new();

        let mut internal: HashMap<&str, i64> = HashMap::new();
        for position in self.positions.values().filter(|p| p.is_open()) {
            *internal.entry(position.symbol.as_str()).or_default() += position.quantity;
        }
        let mut broker_view: HashMap<&str, i64> = HashMap::new();
        for position in &broker_positions {
            *broker_view.entry(position.symbol.as_str()).or_default() += position.quantity;
        }
        for (symbol, qty) in &internal {
            let broker_qty = broker_view.get(symbol).copied().unwrap_or(0);
            if broker_qty != *qty {
                mismatches.push(format!("{symbol}: ledger {qty}, broker {broker_qty}"));
            }
        }
        for (symbol, qty) in &broker_view {
            if !internal.contains_key(symbol) && *qty != 0 {
                mismatches.push(format!("{symbol}: ledger 0, broker {qty}"));
            }
        }

        let internal_equity: Decimal = self.ledger.iter().map(|a| a.current_value).sum();
        if (balances.equity - internal_equity).abs() > self.reconcile_tolerance {
            mismatches.push(format!(
                "equity: ledger ${internal_equity}, broker ${}",
                balances.equity
            ));
        }

        if !mismatches.is_empty() {
            self.append_audit(
                AuditEvent::new(AuditKind::Reconciliation, ACTOR)
                    .with_payload(json!({ "status": "mismatch", "details": mismatches })),
            )
            .await?;
            warn!("AccountManager: reconciliation failed: {:?}", mismatches);
            return Err(AccountError::ReconciliationMismatch {
                id: AccountId(uuid::Uuid::nil()),
                detail: mismatches.join("; "),
            });
        }

        self.append_audit(
            AuditEvent::new(AuditKind::Reconciliation, ACTOR)
                .with_payload(json!({ "status": "clean" })),
        )
        .await?;

        let safe_ids: Vec<AccountId> = self
            .ledger
            .iter()
            .filter(|a| a.state == AccountState::Safe)
            .map(|a| a.id)
            .collect();
        for id in safe_ids {
            self.handle_transition(id, AccountState::Active).await?;
        }
        info!("AccountManager: reconciliation clean, accounts ACTIVE");
        Ok(())
    }

    fn record_equity(&mut self, account_id: AccountId) {
        let Ok(account) = self.ledger.get(account_id) else {
            return;
        };
        let unrealized: Decimal = account
            .position_ids
            .iter()
            .filter_map(|id| self.positions.get(id))
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl())
            .sum();
        let equity = account.current_value + unrealized;
        self.attribution.record_equity(account_id, Utc::now(), equity);
    }

    fn subtree_weights(&self, root: AccountId) -> Vec<(AccountId, Decimal)> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Ok(account) = self.ledger.get(id) {
                out.push((id, account.current_value));
                stack.extend(self.ledger.children_of(id).iter().map(|a| a.id));
            }
        }
        out
    }

    async fn check_invariants(&mut self, account_id: AccountId) -> Result<(), AccountError> {
        let account = self.ledger.get(account_id)?;
        if let Err(e) = account.check_invariants() {
            error!("AccountManager: invariant violation: {}", e);
            self.health.set_error(ACTOR, e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<i64, AccountError> {
        self.audit
            .append(event)
            .await
            .map(|record| record.seq)
            .map_err(|e| AccountError::Audit(e.to_string()))
    }
}
