//! VIX-driven posture: the hedged-week trigger deploys a tail hedge, the
//! safe-mode trigger parks every account.

mod common;

use common::{HarnessOptions, start_system, wait_for};
use covenant::domain::audit::{AuditFilter, AuditKind};
use covenant::domain::types::SystemPosture;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn hedged_week_trigger_deploys_a_hedge() {
    let harness = start_system(HarnessOptions::default()).await;
    assert_eq!(harness.handle.posture(), SystemPosture::Active);

    harness.primary.set_mark("VIX", dec!(55));
    harness.backup.set_mark("VIX", dec!(55));

    let handle = harness.handle.clone();
    wait_for("hedged-week posture", Duration::from_secs(15), || {
        let handle = handle.clone();
        async move { handle.posture() == SystemPosture::HedgedWeek }
    })
    .await;

    let handle = harness.handle.clone();
    wait_for("hedge deployment record", Duration::from_secs(15), || {
        let handle = handle.clone();
        async move {
            handle
                .query_audit(&AuditFilter::for_kind(AuditKind::HedgeEvent), 10)
                .await
                .is_ok_and(|records| !records.is_empty())
        }
    })
    .await;

    // The hedge decision itself went through the Rules Engine.
    let evaluations = harness
        .handle
        .query_audit(&AuditFilter::for_kind(AuditKind::RuleEvaluation), 100)
        .await
        .unwrap();
    assert!(evaluations.iter().any(|r| {
        r.event.payload.get("action").and_then(|v| v.as_str()) == Some("deploy_hedge")
    }));

    let posture_changes = harness
        .handle
        .query_audit(&AuditFilter::for_kind(AuditKind::PostureChange), 10)
        .await
        .unwrap();
    assert!(!posture_changes.is_empty());
}

#[tokio::test]
async fn safe_mode_trigger_parks_every_account() {
    let harness = start_system(HarnessOptions::default()).await;

    harness.primary.set_mark("VIX", dec!(70));
    harness.backup.set_mark("VIX", dec!(70));

    let handle = harness.handle.clone();
    wait_for("safe-mode posture", Duration::from_secs(15), || {
        let handle = handle.clone();
        async move { handle.posture() == SystemPosture::Safe }
    })
    .await;

    let handle = harness.handle.clone();
    wait_for("accounts to park", Duration::from_secs(10), || {
        let handle = handle.clone();
        async move {
            handle
                .snapshot_accounts()
                .await
                .iter()
                .all(|a| a.state == covenant::domain::accounts::AccountState::Safe)
        }
    })
    .await;

    // New opens are refused while SAFE.
    let order = harness
        .handle
        .open_position(common::csp_open("safe-blocked", 5))
        .await
        .unwrap();
    assert_eq!(order.status, covenant::domain::orders::OrderStatus::Rejected);
}

#[tokio::test]
async fn kill_switch_is_sticky() {
    let harness = start_system(HarnessOptions::default()).await;

    harness.primary.set_mark("VIX", dec!(85));
    harness.backup.set_mark("VIX", dec!(85));

    let handle = harness.handle.clone();
    wait_for("kill switch", Duration::from_secs(15), || {
        let handle = handle.clone();
        async move { handle.posture() == SystemPosture::KillSwitch }
    })
    .await;

    // VIX calming down does not re-arm a tripped kill switch.
    harness.primary.set_mark("VIX", dec!(15));
    harness.backup.set_mark("VIX", dec!(15));
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(harness.handle.posture(), SystemPosture::KillSwitch);
}
