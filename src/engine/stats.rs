//! Engine Stats — read-only snapshot for observers

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::trigger::TriggerPhase;

/// Point-in-time view of queue, thresholds and ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub orders_in_queue: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub fee_wallet: String,
    pub accrued_fees: Decimal,
    pub fee_rate: Decimal,
    pub processor_running: bool,
    pub trigger_phase: TriggerPhase,
    pub orders_accepted: u64,
    pub batches_closed: u64,
    pub batches_settled: u64,
    pub batches_failed: u64,
    pub orders_settled: u64,
    pub orders_failed: u64,
    pub total_fees_collected: Decimal,
}

impl EngineStats {
    /// Batches handed to the settlement worker that have not finished yet
    pub fn batches_in_flight(&self) -> u64 {
        self.batches_closed
            .saturating_sub(self.batches_settled + self.batches_failed)
    }
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine[queue={}/{}, timeout={}ms, batches={} settled/{} failed, fees={} accrued/{} collected]",
            self.orders_in_queue,
            self.batch_size,
            self.batch_timeout_ms,
            self.batches_settled,
            self.batches_failed,
            self.accrued_fees,
            self.total_fees_collected
        )
    }
}
