//! Fee Ledger — accrued fees owed to the configured recipient
//!
//! Accruals come only from the settlement executor. Collection pays the
//! current balance through the payout collaborator and deducts it only after
//! the payout confirms, so a failed payout leaves the balance intact.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::domain::CollectionReceipt;
use crate::error::{EngineError, Result};
use crate::settlement::PayoutCollaborator;

/// Accrued-but-uncollected fee balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeRecord {
    pub accrued_amount: Decimal,
    pub recipient: String,
    /// Lifetime total paid out
    pub total_collected: Decimal,
    pub collections: u64,
}

impl FeeRecord {
    fn new(recipient: String) -> Self {
        Self {
            accrued_amount: Decimal::ZERO,
            recipient,
            total_collected: Decimal::ZERO,
            collections: 0,
        }
    }
}

pub struct FeeLedger {
    record: RwLock<FeeRecord>,
    /// Serializes collections so one balance is never paid twice
    collect_lock: Mutex<()>,
    payout: Arc<dyn PayoutCollaborator>,
}

impl FeeLedger {
    pub fn new(recipient: impl Into<String>, payout: Arc<dyn PayoutCollaborator>) -> Self {
        Self {
            record: RwLock::new(FeeRecord::new(recipient.into())),
            collect_lock: Mutex::new(()),
            payout,
        }
    }

    /// Add settled fees to the balance
    ///
    /// An accrual that would overflow the balance is rejected and leaves it
    /// unchanged.
    pub async fn accrue(&self, amount: Decimal) -> Result<()> {
        let mut record = self.record.write().await;
        let next = record.accrued_amount.checked_add(amount).ok_or_else(|| {
            EngineError::AmountOverflow(format!(
                "accrued fees {} + {}",
                record.accrued_amount, amount
            ))
        })?;
        record.accrued_amount = next;
        Ok(())
    }

    /// Whether `amount` can be accrued without overflowing the balance
    pub async fn can_accrue(&self, amount: Decimal) -> bool {
        self.record
            .read()
            .await
            .accrued_amount
            .checked_add(amount)
            .is_some()
    }

    /// Current accrued balance
    pub async fn balance(&self) -> Decimal {
        self.record.read().await.accrued_amount
    }

    pub async fn record(&self) -> FeeRecord {
        self.record.read().await.clone()
    }

    /// Pay the accrued balance to the recipient
    ///
    /// The paid amount is deducted only after the payout collaborator
    /// confirms; fees accrued while the payout is in flight stay on the books.
    pub async fn collect(&self) -> Result<CollectionReceipt> {
        let _collecting = self.collect_lock.lock().await;

        let (amount, recipient, collected) = {
            let record = self.record.read().await;
            (
                record.accrued_amount,
                record.recipient.clone(),
                record.total_collected,
            )
        };

        if amount <= Decimal::ZERO {
            return Err(EngineError::NothingToCollect);
        }

        // total_collected only changes under collect_lock
        let total_collected = collected.checked_add(amount).ok_or_else(|| {
            EngineError::AmountOverflow(format!("total collected {} + {}", collected, amount))
        })?;

        let confirmation = match self.payout.pay(amount, &recipient).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                error!(%amount, %recipient, error = %e, "fee payout failed; balance retained");
                return Err(EngineError::Payout(e));
            }
        };

        {
            let mut record = self.record.write().await;
            record.accrued_amount -= amount;
            record.total_collected = total_collected;
            record.collections += 1;
        }

        info!(
            %amount, %recipient,
            confirmation = %confirmation.handle,
            "fees collected"
        );

        Ok(CollectionReceipt {
            amount,
            recipient,
            confirmation: confirmation.handle,
            collected_at: Utc::now(),
        })
    }
}
