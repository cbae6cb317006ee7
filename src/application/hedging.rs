//! VIX posture watcher and tail-hedge coordinator. Crossing the hedged-week
//! trigger proposes an SPX put through the Rules Engine; crossing safe-mode
//! moves every account to SAFE; the kill switch halts new opens until an
//! operator restart.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::accounts::AccountManagerHandle;
use crate::application::execution::ExecutionHandle;
use crate::application::rules_engine::RulesEngine;
use crate::domain::accounts::AccountState;
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::market::MarketQuote;
use crate::domain::orders::{OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::domain::positions::CONTRACT_MULTIPLIER;
use crate::domain::rules::ProposedAction;
use crate::domain::rules::action::{DeployHedgeAction, HedgeInstrumentKind};
use crate::domain::types::SystemPosture;
use crate::infrastructure::persistence::audit_log::AuditLog;

const ACTOR: &str = "hedging";

pub struct HedgeCoordinator {
    pub vix: watch::Receiver<Option<MarketQuote>>,
    pub posture_tx: watch::Sender<SystemPosture>,
    pub rules: Arc<RulesEngine>,
    pub execution: ExecutionHandle,
    pub accounts: AccountManagerHandle,
    pub audit: AuditLog,
    /// Operator estimate of per-contract hedge premium for sizing.
    pub premium_estimate: Decimal,
    pub shutdown: watch::Receiver<bool>,
    /// Notional already spent on the hedge book this posture cycle.
    pub hedge_book: Decimal,
}

impl HedgeCoordinator {
    pub async fn run(mut self) {
        info!("HedgeCoordinator started.");
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("HedgeCoordinator: shutdown");
                    return;
                }
                _ = tick.tick() => {}
            }

            let Some(vix_quote) = self.vix.borrow().clone() else {
                continue;
            };
            let vix = vix_quote.mid();
            let policy = self.rules.constitution().hedging().clone();
            let current = *self.posture_tx.borrow();

            let target = if policy.kill_switch_triggered(vix) {
                SystemPosture::KillSwitch
            } else if policy.safe_mode_triggered(vix) {
                SystemPosture::Safe
            } else if policy.hedged_week_triggered(vix) {
                SystemPosture::HedgedWeek
            } else {
                SystemPosture::Active
            };

            // The kill switch is sticky: only an operator restart re-arms.
            if current == SystemPosture::KillSwitch {
                continue;
            }
            // Leaving SAFE requires reconciliation, which the orchestrator
            // drives; the watcher only ever escalates out of ACTIVE here.
            if current == SystemPosture::Safe && target == SystemPosture::Active {
                continue;
            }
            if target == current {
                continue;
            }

            self.change_posture(current, target, vix).await;
        }
    }

    async fn change_posture(&mut self, from: SystemPosture, to: SystemPosture, vix: Decimal) {
        warn!("HedgeCoordinator: posture {} -> {} (VIX {})", from, to, vix);
        let _ = self.posture_tx.send(to);
        let event = AuditEvent::new(AuditKind::PostureChange, ACTOR).with_payload(json!({
            "from": from.to_string(),
            "to": to.to_string(),
            "vix": vix.to_string(),
        }));
        if let Err(e) = self.audit.append(event).await {
            warn!("HedgeCoordinator: audit failed: {}", e);
        }

        match to {
            SystemPosture::HedgedWeek => {
                self.deploy_hedge(vix).await;
            }
            SystemPosture::Safe | SystemPosture::KillSwitch => {
                let moved = self.accounts.transition_all(AccountState::Safe).await;
                info!("HedgeCoordinator: {} accounts moved to SAFE", moved);
            }
            SystemPosture::Active => {
                self.hedge_book = Decimal::ZERO;
            }
        }
    }

    /// Size and propose an SPX protective put inside the budget band.
    async fn deploy_hedge(&mut self, vix: Decimal) {
        let policy = self.rules.constitution().hedging().clone();
        let accounts = self.accounts.snapshot().await;
        let total_capital: Decimal = accounts.iter().map(|a| a.current_value).sum();
        if total_capital <= Decimal::ZERO {
            return;
        }

        let target_budget = total_capital * policy.budget_min_pct;
        let per_contract = self.premium_estimate * CONTRACT_MULTIPLIER;
        let contracts = ((target_budget - self.hedge_book) / per_contract)
            .to_i64()
            .unwrap_or(0);
        if contracts <= 0 {
            return;
        }
        let cost = per_contract * Decimal::from(contracts);
        let dte = (policy.dte.min + policy.dte.max) / 2;

        let action = ProposedAction::DeployHedge(DeployHedgeAction {
            vix,
            instrument: HedgeInstrumentKind::SpxPut,
            symbol: "SPX".to_string(),
            delta: policy.spx_put_delta,
            dte,
            cost,
            hedge_book_notional: self.hedge_book,
            total_capital,
        });

        let client_order_id = format!("hedge-{}", uuid::Uuid::new_v4());
        let request = OrderRequest {
            client_order_id: client_order_id.clone(),
            account_id: accounts[0].id,
            position_id: None,
            symbol: "SPX".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: contracts,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        };

        match self.execution.submit(request, action).await {
            Ok(order)
                if !matches!(order.status, OrderStatus::Rejected | OrderStatus::Error) =>
            {
                self.hedge_book += cost;
                let event = AuditEvent::new(AuditKind::HedgeEvent, ACTOR)
                    .with_subject(client_order_id)
                    .with_payload(json!({
                        "contracts": contracts,
                        "cost": cost.to_string(),
                        "vix": vix.to_string(),
                    }));
                if let Err(e) = self.audit.append(event).await {
                    warn!("HedgeCoordinator: audit failed: {}", e);
                }
                info!(
                    "HedgeCoordinator: deployed {} SPX put contracts (${})",
                    contracts, cost
                );
            }
            Ok(order) => {
                warn!(
                    "HedgeCoordinator: hedge order {} ended {}",
                    order.client_order_id, order.status
                );
            }
            Err(e) => {
                warn!("HedgeCoordinator: hedge submission failed: {}", e);
            }
        }
    }
}
