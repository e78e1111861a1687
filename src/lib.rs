pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod settlement;
pub mod validation;

pub use config::{AppConfig, EngineConfig, LoggingConfig, ShutdownPolicy};
pub use domain::{
    Batch, BatchFailure, CloseReason, CollectionReceipt, Order, OrderId, OrderRequest, OrderSide,
    OrderStatus, SettlementEvent, SettlementReceipt,
};
pub use engine::{BatchEngine, EngineStats, TriggerPhase};
pub use error::{BackendError, EngineError, PayoutError, Result};
pub use settlement::{
    BatchDescriptor, Confirmation, DryRunPayout, DryRunSettlementBackend, PayoutCollaborator,
    SettlementBackend,
};
