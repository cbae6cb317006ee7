//! Sliding-window rate limiter between validation and the venue. FIFO:
//! orders the venue cannot take yet queue in arrival order.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time;
use tracing::{info, warn};

use crate::domain::orders::Order;

pub struct DispatchThrottler {
    order_rx: Receiver<Order>,
    venue_tx: Sender<Order>,
    max_orders_per_minute: u32,
    window: Duration,
    recent: VecDeque<Instant>,
    queued: VecDeque<Order>,
}

impl DispatchThrottler {
    pub fn new(order_rx: Receiver<Order>, venue_tx: Sender<Order>, max_orders_per_minute: u32) -> Self {
        Self::with_window(order_rx, venue_tx, max_orders_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(
        order_rx: Receiver<Order>,
        venue_tx: Sender<Order>,
        max_orders_per_minute: u32,
        window: Duration,
    ) -> Self {
        Self {
            order_rx,
            venue_tx,
            max_orders_per_minute,
            window,
            recent: VecDeque::new(),
            queued: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        info!(
            "DispatchThrottler started (limit: {} orders/min)",
            self.max_orders_per_minute
        );

        let mut tick = time::interval(Duration::from_millis(100));
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = tick.tick() => {
                    self.drain_queue().await;
                }

                maybe_order = self.order_rx.recv() => {
                    let Some(order) = maybe_order else {
                        info!("DispatchThrottler: input closed, stopping.");
                        return;
                    };
                    self.accept(order).await;
                    self.drain_queue().await;
                }
            }
        }
    }

    async fn accept(&mut self, order: Order) {
        self.expire_window();
        if self.has_capacity() {
            self.forward(order).await;
        } else {
            warn!(
                "DispatchThrottler: rate limit reached, queueing {} (depth {})",
                order.client_order_id,
                self.queued.len() + 1
            );
            self.queued.push_back(order);
        }
    }

    async fn drain_queue(&mut self) {
        self.expire_window();
        while !self.queued.is_empty() && self.has_capacity() {
            if let Some(order) = self.queued.pop_front() {
                self.forward(order).await;
            }
        }
    }

    fn expire_window(&mut self) {
        let cutoff = Instant::now() - self.window;
        while self.recent.front().is_some_and(|t| *t < cutoff) {
            self.recent.pop_front();
        }
    }

    fn has_capacity(&self) -> bool {
        (self.recent.len() as u32) < self.max_orders_per_minute
    }

    async fn forward(&mut self, order: Order) {
        self.recent.push_back(Instant::now());
        if self.venue_tx.send(order).await.is_err() {
            warn!("DispatchThrottler: venue channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::{OrderRequest, OrderSide, OrderType, TimeInForce};
    use crate::domain::types::AccountId;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn order(id: &str) -> Order {
        Order::from_request(
            OrderRequest {
                client_order_id: id.to_string(),
                account_id: AccountId::generate(),
                position_id: None,
                symbol: "SPY".to_string(),
                side: OrderSide::Sell,
                order_type: OrderType::Market,
                quantity: 1,
                limit_price: None,
                stop_price: None,
                time_in_force: TimeInForce::Day,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn forwards_under_the_limit() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        tokio::spawn(DispatchThrottler::new(in_rx, out_tx, 10).run());

        for i in 0..3 {
            in_tx.send(order(&format!("ord-{i}"))).await.unwrap();
        }
        for i in 0..3 {
            let forwarded = out_rx.recv().await.unwrap();
            assert_eq!(forwarded.client_order_id, format!("ord-{i}"));
        }
    }

    #[tokio::test]
    async fn queues_beyond_the_limit_and_preserves_fifo() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        // Tiny window so the test releases quickly.
        tokio::spawn(
            DispatchThrottler::with_window(in_rx, out_tx, 2, Duration::from_millis(200)).run(),
        );

        for i in 0..4 {
            in_tx.send(order(&format!("ord-{i}"))).await.unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(out_rx.recv().await.unwrap().client_order_id);
        }
        assert_eq!(seen, vec!["ord-0", "ord-1", "ord-2", "ord-3"]);
    }
}
