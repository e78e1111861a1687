//! Settlement Executor — one backend call per closed batch
//!
//! `settle` is serialized behind a submit lock so a backend with a global
//! nonce sees one batch at a time. `run_settlement_worker` consumes closed
//! batches from the trigger in close order and publishes each outcome.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info};

use super::ledger::FeeLedger;
use super::queue::OrderQueue;
use crate::config::EngineConfig;
use crate::domain::{
    Batch, BatchFailure, OrderId, OrderStatus, SettlementEvent, SettlementReceipt,
};
use crate::error::{EngineError, Result};
use crate::settlement::{BatchDescriptor, SettlementBackend};

/// Lifetime settlement counters
#[derive(Debug, Default)]
pub struct SettlementCounters {
    pub batches_settled: AtomicU64,
    pub batches_failed: AtomicU64,
    pub orders_settled: AtomicU64,
    pub orders_failed: AtomicU64,
}

impl SettlementCounters {
    pub(crate) fn record_failed(&self, orders: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.orders_failed
            .fetch_add(orders as u64, Ordering::Relaxed);
    }
}

pub struct SettlementExecutor {
    config: Arc<EngineConfig>,
    backend: Arc<dyn SettlementBackend>,
    order_queue: Arc<RwLock<OrderQueue>>,
    ledger: Arc<FeeLedger>,
    counters: Arc<SettlementCounters>,
    submit_lock: Mutex<()>,
}

impl SettlementExecutor {
    pub fn new(
        config: Arc<EngineConfig>,
        backend: Arc<dyn SettlementBackend>,
        order_queue: Arc<RwLock<OrderQueue>>,
        ledger: Arc<FeeLedger>,
        counters: Arc<SettlementCounters>,
    ) -> Self {
        Self {
            config,
            backend,
            order_queue,
            ledger,
            counters,
            submit_lock: Mutex::new(()),
        }
    }

    /// Settle a closed batch with a single backend submission
    ///
    /// On success the batch's fees are accrued and then every order becomes
    /// `settled`; on failure every order becomes `failed` and nothing is
    /// accrued. A batch whose totals would overflow, or whose fees would not
    /// fit the ledger, fails without being submitted. Failed orders are never
    /// re-queued.
    pub async fn settle(&self, batch: &Batch) -> Result<SettlementReceipt> {
        if batch.is_empty() {
            return Err(EngineError::Internal(format!(
                "refusing to settle empty batch {}",
                batch.id
            )));
        }

        let order_ids = batch.order_ids();
        let _serial = self.submit_lock.lock().await;

        let (descriptor, total_input) = match self.prepare(batch).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.fail_batch(batch, &order_ids, &e).await;
                return Err(e);
            }
        };

        debug!(
            batch_id = batch.id,
            orders = descriptor.order_count(),
            "submitting batch to settlement backend"
        );

        match self.backend.submit(&descriptor).await {
            Ok(confirmation) => {
                // headroom was checked under the submit lock; collections only lower the balance
                let accrued = self.ledger.accrue(descriptor.total_fees).await;

                self.order_queue
                    .write()
                    .await
                    .mark(&order_ids, OrderStatus::Settled);
                self.counters.batches_settled.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .orders_settled
                    .fetch_add(order_ids.len() as u64, Ordering::Relaxed);
                accrued.map_err(|e| {
                    EngineError::Internal(format!(
                        "batch {} settled but its fees were not accrued: {}",
                        batch.id, e
                    ))
                })?;

                info!(
                    batch_id = batch.id,
                    orders = order_ids.len(),
                    close_reason = %batch.close_reason,
                    fees = %descriptor.total_fees,
                    confirmation = %confirmation.handle,
                    "batch settled"
                );

                Ok(SettlementReceipt {
                    batch_id: batch.id,
                    order_ids,
                    close_reason: batch.close_reason,
                    confirmation: confirmation.handle,
                    total_input,
                    total_fees: descriptor.total_fees,
                    settled_at: Utc::now(),
                })
            }
            Err(e) => {
                let err = EngineError::Backend {
                    batch_id: batch.id,
                    source: e,
                };
                self.fail_batch(batch, &order_ids, &err).await;
                Err(err)
            }
        }
    }

    /// Checked totals and the submission descriptor for a batch
    async fn prepare(&self, batch: &Batch) -> Result<(BatchDescriptor, Decimal)> {
        let total_input = batch.total_input().ok_or_else(|| {
            EngineError::AmountOverflow(format!("total input of batch {}", batch.id))
        })?;
        let descriptor =
            BatchDescriptor::from_batch(batch, self.config.fee_rate, &self.config.fee_recipient)?;

        if !self.ledger.can_accrue(descriptor.total_fees).await {
            return Err(EngineError::AmountOverflow(format!(
                "fees {} of batch {} exceed fee ledger capacity",
                descriptor.total_fees, batch.id
            )));
        }

        Ok((descriptor, total_input))
    }

    async fn fail_batch(&self, batch: &Batch, order_ids: &[OrderId], err: &EngineError) {
        self.order_queue
            .write()
            .await
            .mark(order_ids, OrderStatus::Failed);
        self.counters.record_failed(order_ids.len());

        error!(
            batch_id = batch.id,
            orders = order_ids.len(),
            close_reason = %batch.close_reason,
            error = %err,
            "batch settlement failed"
        );
    }
}

/// Settle batches in the order they were closed until the channel closes
pub async fn run_settlement_worker(
    executor: Arc<SettlementExecutor>,
    mut batch_rx: mpsc::UnboundedReceiver<Batch>,
    event_tx: broadcast::Sender<SettlementEvent>,
) {
    info!("settlement worker started");

    while let Some(batch) = batch_rx.recv().await {
        let failure = match executor.settle(&batch).await {
            Ok(receipt) => {
                let _ = event_tx.send(SettlementEvent::BatchSettled(receipt));
                continue;
            }
            Err(EngineError::Backend { source, .. }) => BatchFailure::Backend(source),
            Err(EngineError::AmountOverflow(what)) => BatchFailure::AmountOverflow(what),
            Err(e) => {
                error!(batch_id = batch.id, error = %e, "batch skipped by settlement worker");
                continue;
            }
        };
        let event = SettlementEvent::BatchFailed {
            batch_id: batch.id,
            order_ids: batch.order_ids(),
            close_reason: batch.close_reason,
            error: failure,
        };

        // no subscribers is fine
        let _ = event_tx.send(event);
    }

    info!("settlement worker stopped");
}
