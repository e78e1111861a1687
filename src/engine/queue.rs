//! Order Queue - FIFO buffer of accepted, unsettled orders

use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{Order, OrderId, OrderStatus};
use crate::error::{EngineError, Result};

/// Queued order plus the monotonic instant it was accepted
#[derive(Debug)]
struct QueuedOrder {
    order: Order,
    enqueued_at: Instant,
}

/// Order queue - strict arrival-order buffer with a lifetime status registry
///
/// The registry remembers every id ever admitted, so ids stay unique for the
/// queue's lifetime and terminal statuses remain inspectable after drain.
#[derive(Debug, Default)]
pub struct OrderQueue {
    /// Orders still in `queued` state, oldest first
    pending: VecDeque<QueuedOrder>,
    /// Status of every order ever admitted
    statuses: HashMap<OrderId, OrderStatus>,
    /// Total orders accepted
    enqueued_count: u64,
    /// Total orders drained into batches
    drained_count: u64,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an order to the tail of the queue
    ///
    /// # Returns
    /// - `Ok((id, depth))` accepted id and the new queue depth
    /// - `Err(DuplicateId)` if the id was ever admitted before
    pub fn add(&mut self, mut order: Order) -> Result<(OrderId, usize)> {
        if self.statuses.contains_key(&order.id) {
            return Err(EngineError::DuplicateId(order.id));
        }

        order.status = OrderStatus::Queued;
        let id = order.id.clone();
        self.statuses.insert(id.clone(), OrderStatus::Queued);
        self.pending.push_back(QueuedOrder {
            order,
            enqueued_at: Instant::now(),
        });
        self.enqueued_count += 1;

        debug!(order_id = %id, depth = self.pending.len(), "order queued");
        Ok((id, self.pending.len()))
    }

    /// Number of orders in `queued` state
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Copy of the queued orders, oldest first
    pub fn snapshot(&self) -> Vec<Order> {
        self.pending.iter().map(|q| q.order.clone()).collect()
    }

    /// Remove and return up to `n` orders from the head, marking them `settling`
    pub fn drain_up_to(&mut self, n: usize) -> Vec<Order> {
        let take = n.min(self.pending.len());
        let mut drained = Vec::with_capacity(take);

        for mut queued in self.pending.drain(..take) {
            queued.order.status = OrderStatus::Settling;
            self.statuses
                .insert(queued.order.id.clone(), OrderStatus::Settling);
            drained.push(queued.order);
        }

        self.drained_count += drained.len() as u64;
        drained
    }

    /// Drain every queued order and mark it `failed`
    ///
    /// Orders pass through `settling` like any drained order, so the status
    /// history stays queued -> settling -> failed.
    pub fn fail_all_pending(&mut self) -> Vec<Order> {
        let mut failed = self.drain_up_to(self.pending.len());
        let ids: Vec<OrderId> = failed.iter().map(|o| o.id.clone()).collect();
        self.mark(&ids, OrderStatus::Failed);
        for order in &mut failed {
            order.status = OrderStatus::Failed;
        }
        failed
    }

    /// Instant the head of the queue was accepted
    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.pending.front().map(|q| q.enqueued_at)
    }

    /// Lifecycle status of any order ever admitted
    pub fn status(&self, id: &OrderId) -> Option<OrderStatus> {
        self.statuses.get(id).copied()
    }

    /// Move drained orders to a terminal status
    ///
    /// Illegal transitions are skipped and counted out of the return value.
    pub fn mark(&mut self, ids: &[OrderId], next: OrderStatus) -> usize {
        let mut updated = 0;
        for id in ids {
            match self.statuses.get_mut(id) {
                Some(status) if status.can_transition_to(next) => {
                    *status = next;
                    updated += 1;
                }
                Some(status) => {
                    warn!(order_id = %id, from = %status, to = %next, "illegal status transition skipped");
                }
                None => {
                    warn!(order_id = %id, "status update for unknown order");
                }
            }
        }
        updated
    }

    /// Depth plus lifetime enqueue/drain counters
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_size: self.pending.len(),
            enqueued_total: self.enqueued_count,
            drained_total: self.drained_count,
        }
    }
}

/// Queue counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub current_size: usize,
    pub enqueued_total: u64,
    pub drained_total: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[{}, enq={}, drained={}]",
            self.current_size, self.enqueued_total, self.drained_total
        )
    }
}
