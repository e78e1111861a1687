//! Dry-run collaborators: settle and pay in-process, never touching a chain.
//!
//! Confirmation handles are SHA-256 digests of the submitted payload, so the
//! same batch always yields the same `0x…` handle.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{BatchDescriptor, Confirmation, PayoutCollaborator, SettlementBackend};
use crate::error::{BackendError, PayoutError};

fn digest_handle(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Settlement backend that confirms every batch unless told to fail
#[derive(Debug, Default)]
pub struct DryRunSettlementBackend {
    fail: AtomicBool,
    latency: Duration,
    submissions: AtomicU64,
}

impl DryRunSettlementBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated submission latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent submissions fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of submit calls received, including failed ones
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementBackend for DryRunSettlementBackend {
    async fn submit(
        &self,
        batch: &BatchDescriptor,
    ) -> std::result::Result<Confirmation, BackendError> {
        let nonce = self.submissions.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            warn!(batch_id = batch.batch_id, "dry-run backend rejecting batch");
            return Err(BackendError::Rejected(format!(
                "dry-run rejection of batch {}",
                batch.batch_id
            )));
        }

        let payload = serde_json::to_vec(batch)
            .map_err(|e| BackendError::Rejected(format!("unencodable batch: {}", e)))?;
        let handle = digest_handle(&[&nonce.to_be_bytes(), &payload]);

        debug!(
            batch_id = batch.batch_id,
            orders = batch.order_count(),
            %handle,
            "dry-run batch settled"
        );
        Ok(Confirmation::new(handle))
    }
}

/// Payout collaborator that confirms every payment unless told to fail
#[derive(Debug, Default)]
pub struct DryRunPayout {
    fail: AtomicBool,
    payments: AtomicU64,
}

impl DryRunPayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of pay calls received, including failed ones
    pub fn payments(&self) -> u64 {
        self.payments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayoutCollaborator for DryRunPayout {
    async fn pay(
        &self,
        amount: Decimal,
        recipient: &str,
    ) -> std::result::Result<Confirmation, PayoutError> {
        let nonce = self.payments.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            warn!(%amount, recipient, "dry-run payout rejecting transfer");
            return Err(PayoutError::Unavailable("dry-run payout disabled".to_string()));
        }

        let handle = digest_handle(&[
            &nonce.to_be_bytes(),
            amount.to_string().as_bytes(),
            recipient.as_bytes(),
        ]);
        debug!(%amount, recipient, %handle, "dry-run payout confirmed");
        Ok(Confirmation::new(handle))
    }
}
