//! BatchEngine — owns the queue and ledger and exposes the observer API
//!
//! Callers submit orders and read stats through a clonable `BatchEngine`.
//! `start_batch_processor` spawns two tasks:
//!   - the batch trigger loop (size / timeout / shutdown select)
//!   - the settlement worker, which settles closed batches one at a time

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::executor::{run_settlement_worker, SettlementCounters, SettlementExecutor};
use super::ledger::FeeLedger;
use super::queue::OrderQueue;
use super::stats::EngineStats;
use super::trigger::{BatchTrigger, TriggerPhase};
use crate::config::EngineConfig;
use crate::domain::{
    CollectionReceipt, Order, OrderId, OrderRequest, OrderStatus, SettlementEvent,
};
use crate::error::{EngineError, Result};
use crate::settlement::{PayoutCollaborator, SettlementBackend};
use crate::validation::validate_order;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngressMode {
    Running,
    Halted,
}

struct ProcessorTasks {
    shutdown_tx: watch::Sender<bool>,
    trigger: JoinHandle<()>,
    worker: JoinHandle<()>,
}

enum ProcessorState {
    NotStarted,
    Running(ProcessorTasks),
    Stopped,
}

/// Clonable engine handle; all clones share one queue, ledger and processor
#[derive(Clone)]
pub struct BatchEngine {
    config: Arc<EngineConfig>,
    order_queue: Arc<RwLock<OrderQueue>>,
    ledger: Arc<FeeLedger>,
    executor: Arc<SettlementExecutor>,
    counters: Arc<SettlementCounters>,
    wake: Arc<Notify>,
    event_tx: broadcast::Sender<SettlementEvent>,
    next_batch_id: Arc<AtomicU64>,
    batches_closed: Arc<AtomicU64>,
    phase_tx: Arc<watch::Sender<TriggerPhase>>,
    ingress_mode: Arc<RwLock<IngressMode>>,
    processor: Arc<Mutex<ProcessorState>>,
}

impl BatchEngine {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn SettlementBackend>,
        payout: Arc<dyn PayoutCollaborator>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| EngineError::InvalidConfig(errors.join("; ")))?;

        let config = Arc::new(config);
        let order_queue = Arc::new(RwLock::new(OrderQueue::new()));
        let ledger = Arc::new(FeeLedger::new(config.fee_recipient.clone(), payout));
        let counters = Arc::new(SettlementCounters::default());
        let executor = Arc::new(SettlementExecutor::new(
            config.clone(),
            backend,
            order_queue.clone(),
            ledger.clone(),
            counters.clone(),
        ));
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (phase_tx, _) = watch::channel(TriggerPhase::Stopped);

        Ok(Self {
            config,
            order_queue,
            ledger,
            executor,
            counters,
            wake: Arc::new(Notify::new()),
            event_tx,
            next_batch_id: Arc::new(AtomicU64::new(1)),
            batches_closed: Arc::new(AtomicU64::new(0)),
            phase_tx: Arc::new(phase_tx),
            ingress_mode: Arc::new(RwLock::new(IngressMode::Running)),
            processor: Arc::new(Mutex::new(ProcessorState::NotStarted)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate and queue an order, returning its accepted id
    ///
    /// Wakes the batch trigger when the queue reaches `batch_size`.
    pub async fn add_order(&self, request: OrderRequest) -> Result<OrderId> {
        // Held across the enqueue so shutdown cannot flush between check and add
        let ingress = self.ingress_mode.read().await;
        if *ingress != IngressMode::Running {
            return Err(EngineError::ShuttingDown);
        }

        validate_order(&request, self.config.fee_rate)?;
        let order = Order::from_request(request, Utc::now());

        let (id, depth) = self.order_queue.write().await.add(order)?;
        drop(ingress);

        if depth >= self.config.batch_size {
            debug!(depth, "batch size reached; waking trigger");
            self.wake.notify_one();
        }
        Ok(id)
    }

    /// Number of orders waiting in the queue
    pub async fn depth(&self) -> usize {
        self.order_queue.read().await.depth()
    }

    /// Read-only copy of the queued orders in FIFO order
    pub async fn queued_orders(&self) -> Vec<Order> {
        self.order_queue.read().await.snapshot()
    }

    /// Lifecycle status of any order this engine has accepted
    pub async fn order_status(&self, id: &OrderId) -> Option<OrderStatus> {
        self.order_queue.read().await.status(id)
    }

    /// Settlement outcomes of every batch closed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.event_tx.subscribe()
    }

    pub fn trigger_phase(&self) -> TriggerPhase {
        *self.phase_tx.borrow()
    }

    /// Pay accrued fees to the configured recipient
    pub async fn collect_fees(&self) -> Result<CollectionReceipt> {
        self.ledger.collect().await
    }

    pub async fn accrued_fees(&self) -> rust_decimal::Decimal {
        self.ledger.balance().await
    }

    /// Snapshot of queue depth, thresholds, ledger and settlement counters
    pub async fn stats(&self) -> EngineStats {
        let queue_stats = self.order_queue.read().await.stats();
        let fees = self.ledger.record().await;
        let processor_running =
            matches!(*self.processor.lock().await, ProcessorState::Running(_));

        EngineStats {
            orders_in_queue: queue_stats.current_size,
            batch_size: self.config.batch_size,
            batch_timeout_ms: self.config.batch_timeout_ms,
            fee_wallet: fees.recipient,
            accrued_fees: fees.accrued_amount,
            fee_rate: self.config.fee_rate,
            processor_running,
            trigger_phase: self.trigger_phase(),
            orders_accepted: queue_stats.enqueued_total,
            batches_closed: self.batches_closed.load(Ordering::Relaxed),
            batches_settled: self.counters.batches_settled.load(Ordering::Relaxed),
            batches_failed: self.counters.batches_failed.load(Ordering::Relaxed),
            orders_settled: self.counters.orders_settled.load(Ordering::Relaxed),
            orders_failed: self.counters.orders_failed.load(Ordering::Relaxed),
            total_fees_collected: fees.total_collected,
        }
    }

    /// Start the trigger loop and settlement worker
    pub async fn start_batch_processor(&self) -> Result<()> {
        let mut state = self.processor.lock().await;
        match *state {
            ProcessorState::Running(_) => return Err(EngineError::ProcessorAlreadyRunning),
            ProcessorState::Stopped => return Err(EngineError::ShuttingDown),
            ProcessorState::NotStarted => {}
        }

        *state = ProcessorState::Running(self.spawn_processor());
        info!(
            batch_size = self.config.batch_size,
            batch_timeout_ms = self.config.batch_timeout_ms,
            "batch processor started"
        );
        Ok(())
    }

    fn spawn_processor(&self) -> ProcessorTasks {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let trigger = BatchTrigger::new(
            self.config.clone(),
            self.order_queue.clone(),
            self.wake.clone(),
            batch_tx,
            self.event_tx.clone(),
            self.counters.clone(),
            self.next_batch_id.clone(),
            self.batches_closed.clone(),
            self.phase_tx.clone(),
        );

        let worker = tokio::spawn(run_settlement_worker(
            self.executor.clone(),
            batch_rx,
            self.event_tx.clone(),
        ));
        let trigger = tokio::spawn(trigger.run(shutdown_rx));

        ProcessorTasks {
            shutdown_tx,
            trigger,
            worker,
        }
    }

    /// Stop accepting orders, apply the shutdown policy to the queue and wait
    /// for every closed batch to finish settling
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut mode = self.ingress_mode.write().await;
            *mode = IngressMode::Halted;
        }

        let state = {
            let mut state = self.processor.lock().await;
            std::mem::replace(&mut *state, ProcessorState::Stopped)
        };

        let tasks = match state {
            ProcessorState::Running(tasks) => tasks,
            ProcessorState::NotStarted => {
                if self.order_queue.read().await.is_empty() {
                    info!("engine shut down before processor start; queue empty");
                    return Ok(());
                }
                warn!("engine shut down before processor start; flushing queue");
                self.spawn_processor()
            }
            ProcessorState::Stopped => return Ok(()),
        };

        let _ = tasks.shutdown_tx.send(true);
        tasks
            .trigger
            .await
            .map_err(|e| EngineError::Internal(format!("batch trigger task failed: {}", e)))?;
        tasks
            .worker
            .await
            .map_err(|e| EngineError::Internal(format!("settlement worker task failed: {}", e)))?;

        info!(
            policy = ?self.config.shutdown_policy,
            "batch engine shut down"
        );
        Ok(())
    }
}
