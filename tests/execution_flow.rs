//! Execution Engine behavior: idempotent submits, slicing at the threshold
//! boundary, and the per-account daily contract cap.

mod common;

use common::{DocOptions, HarnessOptions, csp_open, start_system, wait_for};
use covenant::domain::audit::{AuditFilter, AuditKind};
use covenant::domain::orders::OrderStatus;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn duplicate_submit_returns_the_existing_order() {
    let harness = start_system(HarnessOptions::default()).await;

    let first = harness
        .handle
        .open_position(csp_open("dup-1", 5))
        .await
        .unwrap();

    let handle = harness.handle.clone();
    wait_for("first order to fill", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            handle
                .execution()
                .order("dup-1")
                .await
                .is_some_and(|o| o.status == OrderStatus::Filled)
        }
    })
    .await;

    // Same client-order-id again: the existing status comes back, no second
    // order, and only a duplicate-detected note on the trail.
    let second = harness
        .handle
        .open_position(csp_open("dup-1", 5))
        .await
        .unwrap();
    assert_eq!(second.client_order_id, first.client_order_id);
    assert_eq!(second.status, OrderStatus::Filled);

    let orders = harness.handle.snapshot_orders().await;
    assert_eq!(
        orders
            .iter()
            .filter(|o| o.client_order_id == "dup-1")
            .count(),
        1
    );
    let duplicates = harness
        .handle
        .query_audit(&AuditFilter::for_kind(AuditKind::DuplicateSubmit), 10)
        .await
        .unwrap();
    assert_eq!(duplicates.len(), 1);

    // And only one position was ever booked.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.handle.snapshot_positions().await.len(), 1);
}

#[tokio::test]
async fn orders_above_the_threshold_split_into_equal_slices() {
    let harness = start_system(HarnessOptions::default()).await;

    // 51 contracts on a $40 strike: one past the slice threshold.
    let mut request = csp_open("big-1", 51);
    request.strike = dec!(40);
    request.option_mid = dec!(1.00);
    request.liquidity.bid = dec!(0.99);
    request.liquidity.ask = dec!(1.01);

    let parent = harness.handle.open_position(request).await.unwrap();
    assert!(!matches!(
        parent.status,
        OrderStatus::Rejected | OrderStatus::Error
    ));

    let handle = harness.handle.clone();
    wait_for("parent aggregate to fill", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            handle
                .execution()
                .order("big-1")
                .await
                .is_some_and(|o| o.status == OrderStatus::Filled)
        }
    })
    .await;

    let orders = harness.handle.snapshot_orders().await;
    let slices: Vec<_> = orders
        .iter()
        .filter(|o| o.parent_order_id.as_deref() == Some("big-1"))
        .collect();
    assert_eq!(slices.len(), 2);
    let mut quantities: Vec<i64> = slices.iter().map(|s| s.quantity).collect();
    quantities.sort_unstable();
    assert_eq!(quantities, vec![25, 26]);
    assert!(slices.iter().all(|s| s.status == OrderStatus::Filled));

    let parent = harness.handle.execution().order("big-1").await.unwrap();
    assert_eq!(parent.filled_quantity, 51);

    // One position for the whole parent quantity.
    let handle = harness.handle.clone();
    wait_for("position to book", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move { !handle.snapshot_positions().await.is_empty() }
    })
    .await;
    let positions = harness.handle.snapshot_positions().await;
    assert_eq!(positions[0].quantity, -51);
}

#[tokio::test]
async fn exactly_threshold_contracts_is_a_single_order() {
    let harness = start_system(HarnessOptions::default()).await;

    let mut request = csp_open("exact-50", 50);
    request.strike = dec!(40);
    request.option_mid = dec!(1.00);
    request.liquidity.bid = dec!(0.99);
    request.liquidity.ask = dec!(1.01);

    harness.handle.open_position(request).await.unwrap();

    let handle = harness.handle.clone();
    wait_for("order to fill", Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            handle
                .execution()
                .order("exact-50")
                .await
                .is_some_and(|o| o.status == OrderStatus::Filled)
        }
    })
    .await;

    let orders = harness.handle.snapshot_orders().await;
    assert!(
        orders
            .iter()
            .all(|o| o.parent_order_id.is_none()),
        "no slices expected at the threshold"
    );
}

#[tokio::test]
async fn daily_contract_cap_rejects_the_overflowing_order() {
    let harness = start_system(HarnessOptions {
        doc: DocOptions {
            daily_contract_cap: 8,
            ..DocOptions::default()
        },
        ..HarnessOptions::default()
    })
    .await;

    let first = harness
        .handle
        .open_position(csp_open("cap-1", 5))
        .await
        .unwrap();
    assert_ne!(first.status, OrderStatus::Rejected);

    // A different permitted symbol, so only the daily cap can object.
    let mut request = csp_open("cap-2", 5);
    request.symbol = "QQQ".to_string();
    let second = harness.handle.open_position(request).await.unwrap();
    assert_eq!(second.status, OrderStatus::Rejected);
    assert!(second.citations.iter().any(|c| c == "§4.Capital.DailyCap"));
}
