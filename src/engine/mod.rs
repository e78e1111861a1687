//! Order-batching and fee-settlement engine
//!
//! Orders accumulate in a FIFO queue and settle as one aggregate backend call
//! per batch. A batch closes when the queue reaches `batch_size` or when the
//! oldest queued order has waited `batch_timeout`, whichever comes first.

pub mod engine;
pub mod executor;
pub mod ledger;
pub mod queue;
pub mod stats;
pub mod trigger;

pub use engine::BatchEngine;
pub use executor::{SettlementCounters, SettlementExecutor};
pub use ledger::{FeeLedger, FeeRecord};
pub use queue::{OrderQueue, QueueStats};
pub use stats::EngineStats;
pub use trigger::{BatchTrigger, TriggerPhase};
