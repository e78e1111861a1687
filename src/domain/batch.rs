use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Order, OrderId};
use crate::error::BackendError;

/// Why a batch was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Queue depth reached the configured batch size
    SizeThreshold,
    /// The oldest queued order waited longer than the batch timeout
    Timeout,
    /// Engine shutdown flushed the remaining queue
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::SizeThreshold => write!(f, "size_threshold"),
            CloseReason::Timeout => write!(f, "timeout"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Orders drained together, in commitment order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: u64,
    pub orders: Vec<Order>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub close_reason: CloseReason,
}

impl Batch {
    /// Close a batch over already-drained orders.
    ///
    /// The accumulation window opens at the first order's submission time.
    pub fn close(id: u64, orders: Vec<Order>, close_reason: CloseReason) -> Self {
        let closed_at = Utc::now();
        let opened_at = orders
            .first()
            .map(|o| o.submitted_at)
            .unwrap_or(closed_at);
        Self {
            id,
            orders,
            opened_at,
            closed_at,
            close_reason,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|o| o.id.clone()).collect()
    }

    /// Sum of input amounts; `None` when it does not fit a Decimal
    pub fn total_input(&self) -> Option<Decimal> {
        self.orders
            .iter()
            .try_fold(Decimal::ZERO, |total, o| total.checked_add(o.input_amount))
    }
}

/// Receipt for a batch the backend confirmed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub batch_id: u64,
    pub order_ids: Vec<OrderId>,
    pub close_reason: CloseReason,
    /// Backend confirmation handle (e.g. a transaction hash)
    pub confirmation: String,
    pub total_input: Decimal,
    pub total_fees: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Receipt for a confirmed fee payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReceipt {
    pub amount: Decimal,
    pub recipient: String,
    pub confirmation: String,
    pub collected_at: DateTime<Utc>,
}

/// Outcome of a closed batch, broadcast to subscribers
#[derive(Debug, Clone)]
pub enum SettlementEvent {
    BatchSettled(SettlementReceipt),
    BatchFailed {
        batch_id: u64,
        order_ids: Vec<OrderId>,
        close_reason: CloseReason,
        error: BatchFailure,
    },
}

impl SettlementEvent {
    pub fn batch_id(&self) -> u64 {
        match self {
            SettlementEvent::BatchSettled(receipt) => receipt.batch_id,
            SettlementEvent::BatchFailed { batch_id, .. } => *batch_id,
        }
    }

    pub fn order_ids(&self) -> &[OrderId] {
        match self {
            SettlementEvent::BatchSettled(receipt) => &receipt.order_ids,
            SettlementEvent::BatchFailed { order_ids, .. } => order_ids,
        }
    }

    pub fn close_reason(&self) -> CloseReason {
        match self {
            SettlementEvent::BatchSettled(receipt) => receipt.close_reason,
            SettlementEvent::BatchFailed { close_reason, .. } => *close_reason,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementEvent::BatchSettled(_))
    }
}

/// Cause of a failed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    Backend(BackendError),
    /// Queued orders failed by a shutdown with the fail policy
    EngineShutdown,
    /// Batch totals or the fee ledger would overflow; never submitted
    AmountOverflow(String),
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchFailure::Backend(e) => write!(f, "{}", e),
            BatchFailure::EngineShutdown => write!(f, "engine shut down before settlement"),
            BatchFailure::AmountOverflow(what) => write!(f, "amount overflow: {}", what),
        }
    }
}
