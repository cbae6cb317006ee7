//! Order slicing: requests above the slice threshold split into near-equal
//! child slices sharing the parent order id for reconciliation.

use crate::domain::orders::OrderRequest;

pub fn slice_order(request: &OrderRequest, threshold: i64) -> Vec<OrderRequest> {
    if request.quantity <= threshold {
        return vec![request.clone()];
    }

    let slices = {
        let d = request.quantity / threshold;
        let r = request.quantity % threshold;
        if (r > 0 && threshold > 0) || (r < 0 && threshold < 0) {
            d + 1
        } else {
            d
        }
    };
    let base = request.quantity / slices;
    let remainder = request.quantity % slices;

    (0..slices)
        .map(|i| {
            let mut slice = request.clone();
            slice.client_order_id = format!("{}#{}", request.client_order_id, i + 1);
            slice.quantity = base + if i < remainder { 1 } else { 0 };
            slice
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::{OrderSide, OrderType, TimeInForce};
    use crate::domain::types::AccountId;
    use rust_decimal_macros::dec;

    fn request(qty: i64) -> OrderRequest {
        OrderRequest {
            client_order_id: "ord-1".to_string(),
            account_id: AccountId::generate(),
            position_id: None,
            symbol: "SPY".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            quantity: qty,
            limit_price: Some(dec!(2.50)),
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    #[test]
    fn at_threshold_is_a_single_order() {
        let slices = slice_order(&request(50), 50);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].client_order_id, "ord-1");
        assert_eq!(slices[0].quantity, 50);
    }

    #[test]
    fn one_over_threshold_splits_in_two() {
        let slices = slice_order(&request(51), 50);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].quantity, 26);
        assert_eq!(slices[1].quantity, 25);
        assert_eq!(slices[0].client_order_id, "ord-1#1");
        assert_eq!(slices[1].client_order_id, "ord-1#2");
    }

    #[test]
    fn slices_are_near_equal_and_sum_to_total() {
        let slices = slice_order(&request(120), 50);
        assert_eq!(slices.len(), 3);
        let quantities: Vec<i64> = slices.iter().map(|s| s.quantity).collect();
        assert_eq!(quantities, vec![40, 40, 40]);
        assert_eq!(quantities.iter().sum::<i64>(), 120);

        let uneven = slice_order(&request(130), 50);
        let quantities: Vec<i64> = uneven.iter().map(|s| s.quantity).collect();
        assert_eq!(quantities.iter().sum::<i64>(), 130);
        assert!(quantities.iter().max().unwrap() - quantities.iter().min().unwrap() <= 1);
    }
}
