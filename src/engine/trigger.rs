//! Batch Trigger — decides when the queue becomes a batch
//!
//! A single loop selects over three sources:
//!   - a wake signal from `add_order` once depth reaches `batch_size`
//!   - a periodic tick that closes batches whose oldest order timed out
//!   - the shutdown signal, after which the remaining queue is flushed
//!
//! Batches are drained under the queue lock and handed to the settlement
//! worker after the lock is released, so accumulation of the next batch
//! continues while the previous one settles.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Notify, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::executor::SettlementCounters;
use super::queue::OrderQueue;
use crate::config::{EngineConfig, ShutdownPolicy};
use crate::domain::{Batch, BatchFailure, CloseReason, OrderStatus, SettlementEvent};

/// Where the trigger is in the current batch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    /// Processor not running
    Stopped,
    /// Queue empty
    Idle,
    /// Orders queued below the size threshold, timer running
    Accumulating,
    /// A trigger fired and batches are being drained
    Closing,
}

pub struct BatchTrigger {
    config: Arc<EngineConfig>,
    order_queue: Arc<RwLock<OrderQueue>>,
    wake: Arc<Notify>,
    batch_tx: mpsc::UnboundedSender<Batch>,
    event_tx: broadcast::Sender<SettlementEvent>,
    counters: Arc<SettlementCounters>,
    next_batch_id: Arc<AtomicU64>,
    batches_closed: Arc<AtomicU64>,
    phase_tx: Arc<watch::Sender<TriggerPhase>>,
}

impl BatchTrigger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        order_queue: Arc<RwLock<OrderQueue>>,
        wake: Arc<Notify>,
        batch_tx: mpsc::UnboundedSender<Batch>,
        event_tx: broadcast::Sender<SettlementEvent>,
        counters: Arc<SettlementCounters>,
        next_batch_id: Arc<AtomicU64>,
        batches_closed: Arc<AtomicU64>,
        phase_tx: Arc<watch::Sender<TriggerPhase>>,
    ) -> Self {
        Self {
            config,
            order_queue,
            wake,
            batch_tx,
            event_tx,
            counters,
            next_batch_id,
            batches_closed,
            phase_tx,
        }
    }

    /// Main trigger loop — returns after shutdown has flushed the queue
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let tick_period = self.config.effective_tick();
        info!(
            batch_size = self.config.batch_size,
            batch_timeout_ms = self.config.batch_timeout_ms,
            tick_ms = tick_period.as_millis() as u64,
            "batch trigger starting"
        );

        let mut tick = tokio::time::interval(tick_period);
        // Don't burst-fire missed ticks
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Orders may have queued before the processor started
        self.close_full_batches().await;

        loop {
            tokio::select! {
                // --- Size threshold reached ---
                _ = self.wake.notified() => {
                    self.close_full_batches().await;
                }

                // --- Periodic: oldest order timed out ---
                _ = tick.tick() => {
                    self.close_expired_batches(Instant::now()).await;
                }

                // --- Shutdown signal ---
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        info!("batch trigger: shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.flush(self.config.shutdown_policy).await;
        self.phase_tx.send_replace(TriggerPhase::Stopped);
        info!("batch trigger: loop exited");
    }

    fn next_id(&self) -> u64 {
        self.next_batch_id.fetch_add(1, Ordering::SeqCst)
    }

    fn set_phase_for_depth(&self, depth: usize) {
        let phase = if depth == 0 {
            TriggerPhase::Idle
        } else {
            TriggerPhase::Accumulating
        };
        self.phase_tx.send_replace(phase);
    }

    /// Close batches of exactly `batch_size` while the queue holds that many
    pub async fn close_full_batches(&self) -> usize {
        let batch_size = self.config.batch_size;
        let (batches, depth) = {
            let mut queue = self.order_queue.write().await;
            let mut batches = Vec::new();
            while queue.depth() >= batch_size {
                if batches.is_empty() {
                    self.phase_tx.send_replace(TriggerPhase::Closing);
                }
                let orders = queue.drain_up_to(batch_size);
                batches.push(Batch::close(self.next_id(), orders, CloseReason::SizeThreshold));
            }
            (batches, queue.depth())
        };

        let closed = batches.len();
        for batch in batches {
            self.dispatch(batch).await;
        }
        self.set_phase_for_depth(depth);
        closed
    }

    /// Close batches while the oldest queued order has waited past the timeout
    ///
    /// Each batch takes up to `batch_size` orders from the head.
    pub async fn close_expired_batches(&self, now: Instant) -> usize {
        let timeout = self.config.batch_timeout();
        let batch_size = self.config.batch_size;
        let (batches, depth) = {
            let mut queue = self.order_queue.write().await;
            let mut batches = Vec::new();
            while let Some(oldest) = queue.oldest_enqueued_at() {
                if now.saturating_duration_since(oldest) < timeout {
                    break;
                }
                if batches.is_empty() {
                    self.phase_tx.send_replace(TriggerPhase::Closing);
                }
                let orders = queue.drain_up_to(batch_size);
                batches.push(Batch::close(self.next_id(), orders, CloseReason::Timeout));
            }
            (batches, queue.depth())
        };

        let closed = batches.len();
        for batch in batches {
            self.dispatch(batch).await;
        }
        self.set_phase_for_depth(depth);
        closed
    }

    /// Apply the shutdown policy to everything still queued
    pub async fn flush(&self, policy: ShutdownPolicy) -> usize {
        match policy {
            ShutdownPolicy::Settle => {
                let batches = {
                    let mut queue = self.order_queue.write().await;
                    let mut batches = Vec::new();
                    while !queue.is_empty() {
                        let orders = queue.drain_up_to(self.config.batch_size);
                        batches.push(Batch::close(self.next_id(), orders, CloseReason::Shutdown));
                    }
                    batches
                };

                let closed = batches.len();
                for batch in batches {
                    self.dispatch(batch).await;
                }
                if closed > 0 {
                    info!(batches = closed, "flushed queued orders for final settlement");
                }
                closed
            }
            ShutdownPolicy::Fail => {
                let failed = self.order_queue.write().await.fail_all_pending();
                if failed.is_empty() {
                    return 0;
                }

                let batch = Batch::close(self.next_id(), failed, CloseReason::Shutdown);
                warn!(
                    batch_id = batch.id,
                    orders = batch.len(),
                    "failing queued orders on shutdown"
                );
                self.batches_closed.fetch_add(1, Ordering::Relaxed);
                self.counters.record_failed(batch.len());
                let _ = self.event_tx.send(SettlementEvent::BatchFailed {
                    batch_id: batch.id,
                    order_ids: batch.order_ids(),
                    close_reason: batch.close_reason,
                    error: BatchFailure::EngineShutdown,
                });
                1
            }
        }
    }

    /// Hand a closed batch to the settlement worker
    async fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        self.batches_closed.fetch_add(1, Ordering::Relaxed);
        info!(
            batch_id = batch.id,
            orders = batch.len(),
            close_reason = %batch.close_reason,
            "batch closed"
        );

        if let Err(mpsc::error::SendError(batch)) = self.batch_tx.send(batch) {
            // Worker is gone; the orders must not stay in `settling` forever
            error!(batch_id = batch.id, "settlement worker unavailable; failing batch");
            let ids = batch.order_ids();
            self.order_queue
                .write()
                .await
                .mark(&ids, OrderStatus::Failed);
            self.counters.record_failed(ids.len());
            let _ = self.event_tx.send(SettlementEvent::BatchFailed {
                batch_id: batch.id,
                order_ids: ids,
                close_reason: batch.close_reason,
                error: BatchFailure::EngineShutdown,
            });
        } else {
            debug!("batch handed to settlement worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, OrderId, OrderRequest, OrderSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        trigger: BatchTrigger,
        queue: Arc<RwLock<OrderQueue>>,
        batch_rx: mpsc::UnboundedReceiver<Batch>,
        event_rx: broadcast::Receiver<SettlementEvent>,
        phase_rx: watch::Receiver<TriggerPhase>,
    }

    fn harness(batch_size: usize, timeout: Duration, policy: ShutdownPolicy) -> Harness {
        let config = Arc::new(
            EngineConfig::new(batch_size, timeout, dec!(0.002), "0xfee")
                .with_shutdown_policy(policy),
        );
        let queue = Arc::new(RwLock::new(OrderQueue::new()));
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = broadcast::channel(16);
        let (phase_tx, phase_rx) = watch::channel(TriggerPhase::Stopped);
        let trigger = BatchTrigger::new(
            config,
            queue.clone(),
            Arc::new(Notify::new()),
            batch_tx,
            event_tx,
            Arc::new(SettlementCounters::default()),
            Arc::new(AtomicU64::new(1)),
            Arc::new(AtomicU64::new(0)),
            Arc::new(phase_tx),
        );
        Harness {
            trigger,
            queue,
            batch_rx,
            event_rx,
            phase_rx,
        }
    }

    async fn enqueue(queue: &Arc<RwLock<OrderQueue>>, id: &str) {
        let order = Order::from_request(
            OrderRequest::new("0xuser", "WETH", "USDC", dec!(5), OrderSide::Buy).with_id(id),
            Utc::now(),
        );
        queue.write().await.add(order).unwrap();
    }

    #[tokio::test]
    async fn test_size_trigger_closes_exact_batches() {
        let mut h = harness(2, Duration::from_secs(60), ShutdownPolicy::Settle);
        for id in ["a", "b", "c", "d", "e"] {
            enqueue(&h.queue, id).await;
        }

        assert_eq!(h.trigger.close_full_batches().await, 2);

        let first = h.batch_rx.recv().await.unwrap();
        let second = h.batch_rx.recv().await.unwrap();
        assert_eq!(first.order_ids(), vec![OrderId::new("a"), OrderId::new("b")]);
        assert_eq!(second.order_ids(), vec![OrderId::new("c"), OrderId::new("d")]);
        assert_eq!(first.close_reason, CloseReason::SizeThreshold);
        assert!(first.id < second.id);
        assert_eq!(h.queue.read().await.depth(), 1);
        assert_eq!(*h.phase_rx.borrow(), TriggerPhase::Accumulating);
    }

    #[tokio::test]
    async fn test_size_trigger_never_closes_empty_batch() {
        let mut h = harness(3, Duration::from_secs(60), ShutdownPolicy::Settle);
        enqueue(&h.queue, "a").await;

        assert_eq!(h.trigger.close_full_batches().await, 0);
        assert!(h.batch_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_trigger_respects_age() {
        let mut h = harness(100, Duration::from_secs(5), ShutdownPolicy::Settle);
        enqueue(&h.queue, "old").await;

        assert_eq!(h.trigger.close_expired_batches(Instant::now()).await, 0);

        tokio::time::advance(Duration::from_secs(3)).await;
        enqueue(&h.queue, "young").await;
        tokio::time::advance(Duration::from_secs(2)).await;

        // head expired: takes everything queued up to batch_size
        assert_eq!(h.trigger.close_expired_batches(Instant::now()).await, 1);
        let batch = h.batch_rx.recv().await.unwrap();
        assert_eq!(batch.close_reason, CloseReason::Timeout);
        assert_eq!(batch.order_ids(), vec![OrderId::new("old"), OrderId::new("young")]);
        assert_eq!(*h.phase_rx.borrow(), TriggerPhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_queue_forms_no_batch_on_tick() {
        let mut h = harness(2, Duration::ZERO, ShutdownPolicy::Settle);
        assert_eq!(h.trigger.close_expired_batches(Instant::now()).await, 0);
        assert!(h.batch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_flush_settle_policy_drains_in_batch_sized_chunks() {
        let mut h = harness(2, Duration::from_secs(60), ShutdownPolicy::Settle);
        for id in ["a", "b", "c"] {
            enqueue(&h.queue, id).await;
        }

        assert_eq!(h.trigger.flush(ShutdownPolicy::Settle).await, 2);
        let first = h.batch_rx.recv().await.unwrap();
        let second = h.batch_rx.recv().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second.close_reason, CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_flush_fail_policy_marks_orders_failed() {
        let mut h = harness(10, Duration::from_secs(60), ShutdownPolicy::Fail);
        enqueue(&h.queue, "a").await;
        enqueue(&h.queue, "b").await;

        assert_eq!(h.trigger.flush(ShutdownPolicy::Fail).await, 1);
        assert!(h.batch_rx.try_recv().is_err());

        match h.event_rx.recv().await.unwrap() {
            SettlementEvent::BatchFailed {
                order_ids, error, ..
            } => {
                assert_eq!(order_ids.len(), 2);
                assert_eq!(error, BatchFailure::EngineShutdown);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            h.queue.read().await.status(&OrderId::new("a")),
            Some(OrderStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_dispatch_without_worker_fails_batch() {
        let h = harness(1, Duration::from_secs(60), ShutdownPolicy::Settle);
        let Harness {
            trigger,
            queue,
            batch_rx,
            mut event_rx,
            ..
        } = h;
        drop(batch_rx);
        enqueue(&queue, "a").await;

        assert_eq!(trigger.close_full_batches().await, 1);
        assert!(!event_rx.recv().await.unwrap().is_settled());
        assert_eq!(
            queue.read().await.status(&OrderId::new("a")),
            Some(OrderStatus::Failed)
        );
    }
}
