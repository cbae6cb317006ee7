//! The Protocol Engine proper: one monitor task per open position, spawned
//! on `track` and cancelled on `untrack` (position removal cancels its state).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{info, warn};

use crate::application::atr_service::AtrService;
use crate::application::protocol::monitor::{PositionMonitor, ProtocolEvent};
use crate::domain::constitution::ProtocolPolicy;
use crate::domain::market::MarketQuote;
use crate::domain::positions::Position;
use crate::domain::protocol::ProtocolState;
use crate::domain::types::PositionId;
use crate::infrastructure::persistence::audit_log::AuditLog;

struct MonitorHandle {
    state: Arc<RwLock<ProtocolState>>,
    shutdown: watch::Sender<bool>,
}

pub struct ProtocolEngine {
    policy: ProtocolPolicy,
    atr: Arc<AtrService>,
    audit: AuditLog,
    event_tx: mpsc::Sender<ProtocolEvent>,
    monitors: Mutex<HashMap<PositionId, MonitorHandle>>,
}

impl ProtocolEngine {
    pub fn new(
        policy: ProtocolPolicy,
        atr: Arc<AtrService>,
        audit: AuditLog,
        event_tx: mpsc::Sender<ProtocolEvent>,
    ) -> Self {
        Self {
            policy,
            atr,
            audit,
            event_tx,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Begin monitoring an open position. Idempotent per position id.
    pub async fn track(
        &self,
        position: Position,
        underlying: watch::Receiver<Option<MarketQuote>>,
        option_mark: Option<watch::Receiver<Option<MarketQuote>>>,
    ) {
        let mut monitors = self.monitors.lock().await;
        if monitors.contains_key(&position.id) {
            warn!("ProtocolEngine: {} is already monitored", position.id);
            return;
        }

        let state = Arc::new(RwLock::new(ProtocolState::new(
            position.id,
            chrono::Utc::now(),
        )));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = PositionMonitor {
            position: position.clone(),
            state: state.clone(),
            policy: self.policy.clone(),
            underlying,
            option_mark,
            atr: self.atr.clone(),
            events: self.event_tx.clone(),
            audit: self.audit.clone(),
            shutdown: shutdown_rx,
        };
        tokio::spawn(monitor.run());

        monitors.insert(
            position.id,
            MonitorHandle {
                state,
                shutdown: shutdown_tx,
            },
        );
        info!("ProtocolEngine: tracking {} ({})", position.id, position.symbol);
    }

    /// Stop monitoring; the monitor task winds down and its state is dropped.
    pub async fn untrack(&self, position_id: PositionId) {
        let mut monitors = self.monitors.lock().await;
        if let Some(handle) = monitors.remove(&position_id) {
            let _ = handle.shutdown.send(true);
            info!("ProtocolEngine: untracked {}", position_id);
        }
    }

    /// Force a position straight to L3 with a pending exit (used when a
    /// forbidden roll must become an immediate exit).
    pub async fn force_exit(&self, position_id: PositionId) -> bool {
        let monitors = self.monitors.lock().await;
        let Some(handle) = monitors.get(&position_id) else {
            return false;
        };
        let mut state = handle.state.write().await;
        state.level = crate::domain::protocol::ProtocolLevel::L3;
        state.pending_action = crate::domain::protocol::PendingAction::Exit;
        state.entered_at = chrono::Utc::now();
        state.below_lower_since = None;
        info!("ProtocolEngine: {} forced to L3 exit", position_id);
        true
    }

    pub async fn state_of(&self, position_id: PositionId) -> Option<ProtocolState> {
        let monitors = self.monitors.lock().await;
        let handle = monitors.get(&position_id)?;
        Some(handle.state.read().await.clone())
    }

    pub async fn monitored_positions(&self) -> Vec<PositionId> {
        self.monitors.lock().await.keys().copied().collect()
    }

    pub async fn shutdown(&self) {
        let mut monitors = self.monitors.lock().await;
        for (_, handle) in monitors.drain() {
            let _ = handle.shutdown.send(true);
        }
    }
}
