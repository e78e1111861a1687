use thiserror::Error;

use crate::domain::OrderId;

/// Main error type for the batching engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Admission errors
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Duplicate order id: {0}")]
    DuplicateId(OrderId),

    #[error("Engine is shutting down; new orders are rejected")]
    ShuttingDown,

    // Settlement errors
    #[error("Settlement of batch {batch_id} failed: {source}")]
    Backend {
        batch_id: u64,
        #[source]
        source: BackendError,
    },

    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    // Fee collection errors
    #[error("Fee payout failed: {0}")]
    Payout(#[from] PayoutError),

    #[error("No accrued fees to collect")]
    NothingToCollect,

    // Lifecycle errors
    #[error("Batch processor is already running")]
    ProcessorAlreadyRunning,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure reported by the settlement backend for a whole batch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Nonce conflict: expected {expected}, got {actual}")]
    NonceConflict { expected: u64, actual: u64 },

    #[error("Timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Failure reported by the fee payout collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayoutError {
    #[error("Payout rejected: {0}")]
    Rejected(String),

    #[error("Payout service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}
