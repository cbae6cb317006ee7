//! Orchestrator lifecycle: startup reconciliation gates ACTIVE, SAFE
//! refuses new opens with a citation, audit sequencing is gap-free, and
//! shutdown drains.

mod common;

use common::{HarnessOptions, csp_open, start_system, wait_for};
use covenant::domain::audit::AuditFilter;
use covenant::domain::errors::ConstitutionError;
use covenant::domain::orders::OrderStatus;
use covenant::domain::types::{HealthStatus, SystemPosture};
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn clean_start_reconciles_and_arms_the_accounts() {
    let harness = start_system(HarnessOptions::default()).await;

    assert_eq!(harness.handle.posture(), SystemPosture::Active);
    let status = harness.handle.status().await;
    assert_eq!(status.accounts, 3);
    assert_eq!(status.open_positions, 0);
    assert_eq!(status.constitution_version, "1.3.0-test");
    assert!(status.audit_flushed_through > 0);
    assert_ne!(status.overall, HealthStatus::Error);
}

#[tokio::test]
async fn broker_mismatch_keeps_the_system_safe_and_refuses_opens() {
    let harness = start_system(HarnessOptions {
        // The broker claims a position the ledger knows nothing about.
        broker_seed: vec![("TSLA".to_string(), 10, dec!(250))],
        ..HarnessOptions::default()
    })
    .await;

    assert_eq!(harness.handle.posture(), SystemPosture::Safe);
    let accounts = harness.handle.snapshot_accounts().await;
    assert!(
        accounts
            .iter()
            .all(|a| a.state == covenant::domain::accounts::AccountState::Safe)
    );

    // The mismatch is on the audit trail.
    let records = harness
        .handle
        .query_audit(
            &AuditFilter::for_kind(covenant::domain::audit::AuditKind::Reconciliation),
            10,
        )
        .await
        .unwrap();
    assert!(records.iter().any(|r| {
        r.event.payload.get("status").and_then(|v| v.as_str()) == Some("mismatch")
    }));

    // SAFE blocks new opens, and the operator sees why.
    let order = harness
        .handle
        .open_position(csp_open("safe-open", 5))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(order.citations.iter().any(|c| c == "§9.States.OpenGate"));
}

#[tokio::test]
async fn audit_sequences_are_gap_free_across_the_run() {
    let harness = start_system(HarnessOptions::default()).await;
    harness
        .handle
        .open_position(csp_open("seq-open", 5))
        .await
        .unwrap();

    let handle = harness.handle.clone();
    wait_for("order to fill", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            handle
                .execution()
                .order("seq-open")
                .await
                .is_some_and(|o| o.status == OrderStatus::Filled)
        }
    })
    .await;

    let records = harness
        .handle
        .query_audit(&AuditFilter::default(), 10_000)
        .await
        .unwrap();
    assert!(records.len() > 5);
    assert_eq!(records[0].seq, 1);
    for pair in records.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1, "gap in audit sequence");
    }

    // The first record of the run stamps the constitution version.
    assert_eq!(
        records[0].event.kind,
        covenant::domain::audit::AuditKind::SystemStart
    );
    assert_eq!(
        records[0].event.constitution_version.as_deref(),
        Some("1.3.0-test")
    );
}

#[tokio::test]
async fn constitution_is_immutable_at_runtime() {
    let harness = start_system(HarnessOptions::default()).await;
    let err = harness.handle.reload_constitution().unwrap_err();
    assert!(matches!(err, ConstitutionError::Immutable));
}

#[tokio::test]
async fn stop_drains_open_work() {
    let harness = start_system(HarnessOptions::default()).await;
    harness
        .handle
        .open_position(csp_open("drain-open", 5))
        .await
        .unwrap();

    harness.handle.stop().await;
    let open = harness.handle.execution().open_orders().await;
    assert!(open.is_empty(), "orders must drain before stop returns");

    // The stop is the last word on the audit trail.
    let records = harness
        .handle
        .query_audit(
            &AuditFilter::for_kind(covenant::domain::audit::AuditKind::SystemStop),
            10,
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}
