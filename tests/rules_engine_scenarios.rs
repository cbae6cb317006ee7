//! End-to-end decision-flow scenarios: a clean CSP open travels the whole
//! pipeline, a delta breach is refused before anything reaches the venue.

mod common;

use common::{HarnessOptions, csp_open, start_system, wait_for};
use covenant::domain::audit::{AuditFilter, AuditKind};
use covenant::domain::orders::OrderStatus;
use covenant::domain::rules::Verdict;
use covenant::domain::types::SystemPosture;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn normal_csp_open_flows_to_filled_and_reserves_collateral() {
    let harness = start_system(HarnessOptions::default()).await;
    assert_eq!(harness.handle.posture(), SystemPosture::Active);

    let order = harness
        .handle
        .open_position(csp_open("s1-open", 5))
        .await
        .expect("submission must be accepted");
    assert!(!matches!(
        order.status,
        OrderStatus::Rejected | OrderStatus::Error
    ));
    // Clause citations for sleeve, delta, DTE, and liquidity all ride on
    // the order.
    for clause in [
        "§2.GenAcc.Instruments",
        "§2.GenAcc.Delta",
        "§2.GenAcc.Dte",
        "§8.Liquidity.OpenInterest",
    ] {
        assert!(
            order.citations.iter().any(|c| c == clause),
            "missing citation {clause}"
        );
    }

    let handle = harness.handle.clone();
    wait_for("order to fill", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            handle
                .execution()
                .order("s1-open")
                .await
                .is_some_and(|o| o.status == OrderStatus::Filled)
        }
    })
    .await;

    let handle = harness.handle.clone();
    wait_for("position to book", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move { !handle.snapshot_positions().await.is_empty() }
    })
    .await;

    // Collateral reservation: qty x 100 x strike.
    let accounts = harness.handle.snapshot_accounts().await;
    let r#gen = accounts
        .iter()
        .find(|a| a.sleeve == covenant::domain::types::Sleeve::Gen)
        .unwrap();
    assert_eq!(r#gen.reserved_capital, dec!(225000));
    assert_eq!(r#gen.available_capital(), r#gen.current_value - dec!(225000));

    // The position is under protocol monitoring.
    let positions = harness.handle.snapshot_positions().await;
    assert_eq!(positions.len(), 1);
    let monitored = harness.handle.protocol().monitored_positions().await;
    assert!(monitored.contains(&positions[0].id));
}

#[tokio::test]
async fn off_band_delta_is_rejected_with_the_delta_clause() {
    let harness = start_system(HarnessOptions::default()).await;

    let mut request = csp_open("s2-open", 5);
    request.delta = dec!(0.60);
    let order = harness.handle.open_position(request).await.unwrap();

    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(order.citations.iter().any(|c| c == "§2.GenAcc.Delta"));

    // Nothing reached the venue and nothing was booked.
    assert!(harness.broker.open_orders().await.unwrap().is_empty());
    assert!(harness.handle.snapshot_positions().await.is_empty());

    // The rejection is on the audit trail with its clause refs.
    let evaluations = harness
        .handle
        .query_audit(&AuditFilter::for_subject("s2-open"), 10)
        .await
        .unwrap();
    assert!(evaluations.iter().any(|r| {
        r.event.kind == AuditKind::RuleEvaluation
            && r.event.clause_refs.iter().any(|c| c == "§2.GenAcc.Delta")
    }));
}

#[tokio::test]
async fn every_filled_order_has_a_prior_approved_evaluation() {
    let harness = start_system(HarnessOptions::default()).await;
    harness
        .handle
        .open_position(csp_open("trace-open", 5))
        .await
        .unwrap();

    let handle = harness.handle.clone();
    wait_for("order to fill", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            handle
                .execution()
                .order("trace-open")
                .await
                .is_some_and(|o| o.status == OrderStatus::Filled)
        }
    })
    .await;

    // Invariant: a rule_evaluation APPROVED record whose subjects include
    // the client-order-id precedes the fill.
    let records = harness
        .handle
        .query_audit(&AuditFilter::for_subject("trace-open"), 100)
        .await
        .unwrap();
    let evaluation_seq = records
        .iter()
        .find(|r| {
            r.event.kind == AuditKind::RuleEvaluation
                && r.event.payload.get("verdict").and_then(|v| v.as_str())
                    != Some("REJECTED")
        })
        .map(|r| r.seq)
        .expect("an approving evaluation must exist");
    let fill_seq = records
        .iter()
        .find(|r| {
            r.event.kind == AuditKind::OrderEvent
                && r.event.payload.get("note").and_then(|v| v.as_str()) == Some("fill")
        })
        .map(|r| r.seq)
        .expect("a fill must be audited");
    assert!(evaluation_seq < fill_seq);
}

#[tokio::test]
async fn boundary_deltas_are_inclusive() {
    let harness = start_system(HarnessOptions::default()).await;
    for (i, delta) in [dec!(0.40), dec!(0.45)].into_iter().enumerate() {
        let mut request = csp_open(&format!("edge-{i}"), 5);
        request.delta = delta;
        let decision = harness
            .handle
            .evaluate_action(&covenant::domain::rules::ProposedAction::OpenPosition(
                covenant::domain::rules::action::OpenPositionAction {
                    account_id: harness.handle.snapshot_accounts().await[0].id,
                    account_state: covenant::domain::accounts::AccountState::Active,
                    sleeve: request.sleeve,
                    symbol: request.symbol.clone(),
                    strategy: request.strategy,
                    delta: request.delta,
                    dte: request.dte,
                    stress_mode: false,
                    contracts: request.contracts,
                    strike: request.strike,
                    option_mid: request.option_mid,
                    proposed_at: chrono::Utc::now(),
                    liquidity: request.liquidity.clone(),
                    capital: covenant::domain::rules::action::CapitalSnapshot {
                        sleeve_capital: dec!(1000000),
                        deployed_notional: dec!(750000),
                        symbol_notional: dec!(0),
                        margin_used: dec!(0),
                    },
                },
            ))
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Approved, "delta {delta}");
    }
}
