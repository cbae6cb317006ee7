//! Per-position monitoring. The level math lives in a pure tick function;
//! the task around it owns the cadence ladder and the data-staleness rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::application::atr_service::{AtrRequest, AtrService};
use crate::domain::atr::AtrMethod;
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::constitution::ProtocolPolicy;
use crate::domain::market::MarketQuote;
use crate::domain::positions::Position;
use crate::domain::protocol::{
    PendingAction, ProtocolLevel, ProtocolState, breach_magnitude, breach_multiple,
};
use crate::domain::types::PositionId;
use crate::infrastructure::persistence::audit_log::AuditLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    LevelThree,
    StopLoss,
    MaxLoss,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::LevelThree => write!(f, "level_three"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::MaxLoss => write!(f, "max_loss"),
        }
    }
}

/// Events the Protocol Engine raises toward the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Escalated {
        position_id: PositionId,
        from: ProtocolLevel,
        to: ProtocolLevel,
        multiple: Decimal,
        pending: PendingAction,
    },
    DeEscalated {
        position_id: PositionId,
        from: ProtocolLevel,
        to: ProtocolLevel,
    },
    RollReady {
        position_id: PositionId,
    },
    ExitRequired {
        position_id: PositionId,
        reason: ExitReason,
    },
    DataStale {
        position_id: PositionId,
    },
}

/// One monitoring tick, pure. Mutates the protocol state and returns the
/// events the transition produced.
///
/// De-escalation discipline: the breach must have measured below the current
/// level for one full monitoring interval at the *new* cadence before the
/// level drops; escalation is immediate.
pub fn evaluate_tick(
    state: &mut ProtocolState,
    position: &Position,
    spot: Decimal,
    atr: Decimal,
    option_mark: Option<Decimal>,
    policy: &ProtocolPolicy,
    now: DateTime<Utc>,
) -> Vec<ProtocolEvent> {
    let mut events = Vec::new();

    let magnitude = breach_magnitude(position.strategy, spot, position.strike);
    let multiple = breach_multiple(magnitude, atr);
    state.last_breach_multiple = multiple;
    let measured = policy.level_for_multiple(multiple);

    if measured > state.level {
        let from = state.level;
        state.level = measured;
        state.entered_at = now;
        state.pending_action = PendingAction::for_level(measured);
        state.below_lower_since = None;
        events.push(ProtocolEvent::Escalated {
            position_id: state.position_id,
            from,
            to: measured,
            multiple,
            pending: state.pending_action,
        });
        if measured == ProtocolLevel::L2 {
            events.push(ProtocolEvent::RollReady {
                position_id: state.position_id,
            });
        }
    } else if measured < state.level {
        let dwell = chrono::Duration::from_std(policy.cadence(measured))
            .unwrap_or(chrono::Duration::MAX);
        match state.below_lower_since {
            Some(since) if now - since >= dwell => {
                let from = state.level;
                state.level = measured;
                state.entered_at = now;
                state.pending_action = PendingAction::for_level(measured);
                state.below_lower_since = None;
                events.push(ProtocolEvent::DeEscalated {
                    position_id: state.position_id,
                    from,
                    to: measured,
                });
            }
            Some(_) => {}
            None => {
                state.below_lower_since = Some(now);
            }
        }
    } else {
        state.below_lower_since = None;
    }

    // Exit conditions are evaluated on every tick, independent of transitions.
    let exit_reason = if multiple >= policy.stop_loss_multiple {
        Some(ExitReason::StopLoss)
    } else if state.level == ProtocolLevel::L3 {
        Some(ExitReason::LevelThree)
    } else {
        option_mark.and_then(|mark| {
            let loss = -position_pnl(position, mark);
            let notional = position.notional();
            if notional > Decimal::ZERO && loss >= notional * policy.max_loss_fraction {
                Some(ExitReason::MaxLoss)
            } else {
                None
            }
        })
    };

    if let Some(reason) = exit_reason
        && state.pending_action != PendingAction::Exit
    {
        state.pending_action = PendingAction::Exit;
        events.push(ProtocolEvent::ExitRequired {
            position_id: state.position_id,
            reason,
        });
    }

    events
}

fn position_pnl(position: &Position, mark: Decimal) -> Decimal {
    (mark - position.entry_price)
        * Decimal::from(position.quantity)
        * crate::domain::positions::CONTRACT_MULTIPLIER
}

pub struct PositionMonitor {
    pub position: Position,
    pub state: Arc<tokio::sync::RwLock<ProtocolState>>,
    pub policy: ProtocolPolicy,
    pub underlying: watch::Receiver<Option<MarketQuote>>,
    pub option_mark: Option<watch::Receiver<Option<MarketQuote>>>,
    pub atr: Arc<AtrService>,
    pub events: mpsc::Sender<ProtocolEvent>,
    pub audit: AuditLog,
    pub shutdown: watch::Receiver<bool>,
}

impl PositionMonitor {
    pub async fn run(mut self) {
        let position_id = self.position.id;
        let mut last_atr = self.position.atr_at_entry;
        let mut last_data_at = Instant::now();
        let mut current_level = { self.state.read().await.level };
        let mut interval = tokio::time::interval(self.policy.cadence(current_level));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("PositionMonitor[{}]: started at {}", position_id, current_level);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("PositionMonitor[{}]: shutdown", position_id);
                    return;
                }
                _ = interval.tick() => {}
            }

            let cadence = self.policy.cadence(current_level);
            let wall_now = Utc::now();

            // Refresh ATR through the cached service; a failure holds the
            // last known value and never implicitly de-escalates.
            let request = AtrRequest {
                symbol: self.position.symbol.clone(),
                period: self.policy.atr_period,
                method: AtrMethod::Wilder,
                window_days: 30,
                as_of: wall_now.date_naive(),
                allow_fallback: true,
            };
            let atr_fresh = match self.atr.compute(&request).await {
                Ok(value) => {
                    last_atr = value.value;
                    true
                }
                Err(e) => {
                    warn!("PositionMonitor[{}]: ATR unavailable: {}", position_id, e);
                    false
                }
            };

            let quote = self.underlying.borrow().clone();
            let spot_fresh = quote
                .as_ref()
                .is_some_and(|q| (wall_now - q.ts) < chrono::Duration::from_std(cadence * 2).unwrap_or(chrono::Duration::MAX));

            let Some(quote) = quote else {
                self.data_stale(position_id, &mut last_data_at, cadence).await;
                continue;
            };

            if !spot_fresh && !atr_fresh {
                self.data_stale(position_id, &mut last_data_at, cadence).await;
                continue;
            }
            last_data_at = Instant::now();

            let mark = self
                .option_mark
                .as_ref()
                .and_then(|rx| rx.borrow().as_ref().map(|q| q.mid()));

            let events = {
                let mut state = self.state.write().await;
                evaluate_tick(
                    &mut state,
                    &self.position,
                    quote.mid(),
                    last_atr,
                    mark,
                    &self.policy,
                    wall_now,
                )
            };

            for event in events {
                self.audit_event(&event).await;
                if self.events.send(event.clone()).await.is_err() {
                    warn!("PositionMonitor[{}]: event channel closed", position_id);
                    return;
                }
                if let ProtocolEvent::Escalated { to, .. } = event {
                    current_level = to;
                    interval = tokio::time::interval(self.policy.cadence(to));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                } else if let ProtocolEvent::DeEscalated { to, .. } = event {
                    current_level = to;
                    interval = tokio::time::interval(self.policy.cadence(to));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                }
            }
        }
    }

    async fn data_stale(
        &self,
        position_id: PositionId,
        last_data_at: &mut Instant,
        cadence: Duration,
    ) {
        if last_data_at.elapsed() < cadence * 2 {
            return;
        }
        *last_data_at = Instant::now();
        warn!(
            "PositionMonitor[{}]: spot and ATR unavailable beyond 2x cadence; holding level",
            position_id
        );
        let event = AuditEvent::new(AuditKind::DataStale, "protocol_engine")
            .with_subject(position_id.to_string());
        if let Err(e) = self.audit.append(event).await {
            warn!("PositionMonitor[{}]: audit failed: {}", position_id, e);
        }
        let _ = self
            .events
            .send(ProtocolEvent::DataStale { position_id })
            .await;
    }

    async fn audit_event(&self, event: &ProtocolEvent) {
        let audit_event = match event {
            ProtocolEvent::Escalated { position_id, from, to, multiple, .. } => {
                AuditEvent::new(AuditKind::ProtocolEscalation, "protocol_engine")
                    .with_subject(position_id.to_string())
                    .with_clause(crate::domain::constitution::protocol::ESCALATION_CLAUSE)
                    .with_payload(json!({
                        "from": from.to_string(),
                        "to": to.to_string(),
                        "multiple": multiple.to_string(),
                    }))
            }
            ProtocolEvent::DeEscalated { position_id, from, to } => {
                AuditEvent::new(AuditKind::ProtocolDeEscalation, "protocol_engine")
                    .with_subject(position_id.to_string())
                    .with_payload(json!({
                        "from": from.to_string(),
                        "to": to.to_string(),
                    }))
            }
            ProtocolEvent::ExitRequired { position_id, reason } => {
                AuditEvent::new(AuditKind::ProtocolEscalation, "protocol_engine")
                    .with_subject(position_id.to_string())
                    .with_clause(crate::domain::constitution::protocol::STOP_LOSS_CLAUSE)
                    .with_payload(json!({ "exit_reason": reason.to_string() }))
            }
            ProtocolEvent::RollReady { .. } | ProtocolEvent::DataStale { .. } => return,
        };
        if let Err(e) = self.audit.append(audit_event).await {
            warn!("PositionMonitor: audit failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constitution::Constitution;
    use crate::domain::positions::PositionStatus;
    use crate::domain::types::{AccountId, StrategyKind};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn policy() -> ProtocolPolicy {
        Constitution::builtin().protocol().clone()
    }

    fn csp_450() -> Position {
        Position {
            id: PositionId::generate(),
            account_id: AccountId::generate(),
            symbol: "SPY".to_string(),
            strategy: StrategyKind::Csp,
            quantity: -10,
            strike: dec!(450),
            expiry: "2025-07-18".parse().unwrap(),
            entry_price: dec!(2.50),
            current_price: dec!(2.50),
            status: PositionStatus::Open,
            protocol_level: ProtocolLevel::L0,
            atr_at_entry: dec!(5),
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 5, 14, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn escalation_ladder_follows_spot() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));
        let atr = dec!(5);

        // Spot sequence from the acceptance scenario: strike 450, ATR 5.
        let expectations = [
            (dec!(448), ProtocolLevel::L0),
            (dec!(446), ProtocolLevel::L0),
            (dec!(445), ProtocolLevel::L1),
            (dec!(444), ProtocolLevel::L1),
            (dec!(443), ProtocolLevel::L1),
            (dec!(441), ProtocolLevel::L2),
        ];
        for (i, (spot, expected)) in expectations.into_iter().enumerate() {
            evaluate_tick(&mut state, &position, spot, atr, None, &policy, t(i as i64));
            assert_eq!(state.level, expected, "spot {spot}");
        }

        // Next tick at 438: breach 12 = 2.4x... continue down to 3x at 435.
        let events = evaluate_tick(&mut state, &position, dec!(435), atr, None, &policy, t(10));
        assert_eq!(state.level, ProtocolLevel::L3);
        assert_eq!(state.pending_action, PendingAction::Exit);
        assert!(events.iter().any(|e| matches!(
            e,
            ProtocolEvent::ExitRequired {
                reason: ExitReason::StopLoss,
                ..
            } | ProtocolEvent::ExitRequired {
                reason: ExitReason::LevelThree,
                ..
            }
        )));
    }

    #[test]
    fn boundary_multiple_belongs_to_the_higher_level() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));
        // Breach exactly 5 = 1.0x ATR.
        evaluate_tick(&mut state, &position, dec!(445), dec!(5), None, &policy, t(0));
        assert_eq!(state.level, ProtocolLevel::L1);
    }

    #[test]
    fn l2_escalation_prepares_roll() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));
        let events =
            evaluate_tick(&mut state, &position, dec!(440), dec!(5), None, &policy, t(0));
        assert_eq!(state.level, ProtocolLevel::L2);
        assert_eq!(state.pending_action, PendingAction::PrepareRoll);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::RollReady { .. })));
    }

    #[test]
    fn de_escalation_requires_a_full_dwell_interval() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));

        evaluate_tick(&mut state, &position, dec!(440), dec!(5), None, &policy, t(0));
        assert_eq!(state.level, ProtocolLevel::L2);

        // Breach clears to L1 territory; first tick only starts the clock.
        evaluate_tick(&mut state, &position, dec!(444), dec!(5), None, &policy, t(10));
        assert_eq!(state.level, ProtocolLevel::L2);

        // Still inside the L1 cadence (60s): no change.
        evaluate_tick(&mut state, &position, dec!(444), dec!(5), None, &policy, t(40));
        assert_eq!(state.level, ProtocolLevel::L2);

        // A full L1 interval below the threshold: drop.
        let events =
            evaluate_tick(&mut state, &position, dec!(444), dec!(5), None, &policy, t(71));
        assert_eq!(state.level, ProtocolLevel::L1);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::DeEscalated { .. })));
    }

    #[test]
    fn bounce_back_resets_the_dwell_clock() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));

        evaluate_tick(&mut state, &position, dec!(440), dec!(5), None, &policy, t(0));
        evaluate_tick(&mut state, &position, dec!(444), dec!(5), None, &policy, t(10));
        // Breach returns to L2 territory: the dwell clock must reset.
        evaluate_tick(&mut state, &position, dec!(439), dec!(5), None, &policy, t(30));
        assert!(state.below_lower_since.is_none());
        evaluate_tick(&mut state, &position, dec!(444), dec!(5), None, &policy, t(80));
        assert_eq!(state.level, ProtocolLevel::L2, "dwell must restart after bounce");
    }

    #[test]
    fn max_loss_forces_exit_without_level_three() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));
        // Notional 450k, max loss 5% = 22.5k. Mark 25.00 vs entry 2.50 on
        // 10 short contracts is a 22.5k loss.
        let events = evaluate_tick(
            &mut state,
            &position,
            dec!(446),
            dec!(5),
            Some(dec!(25.00)),
            &policy,
            t(0),
        );
        assert_eq!(state.level, ProtocolLevel::L0);
        assert_eq!(state.pending_action, PendingAction::Exit);
        assert!(events.iter().any(|e| matches!(
            e,
            ProtocolEvent::ExitRequired {
                reason: ExitReason::MaxLoss,
                ..
            }
        )));
    }

    #[test]
    fn zero_atr_never_escalates() {
        let policy = policy();
        let position = csp_450();
        let mut state = ProtocolState::new(position.id, t(0));
        evaluate_tick(&mut state, &position, dec!(400), dec!(0), None, &policy, t(0));
        assert_eq!(state.level, ProtocolLevel::L0);
    }
}
