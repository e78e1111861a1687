use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Batch, OrderId, OrderSide};
use crate::error::{BackendError, EngineError, PayoutError, Result};

/// One order's leg inside an aggregate settlement request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementLeg {
    pub order_id: OrderId,
    pub requester: String,
    pub input_asset: String,
    pub output_asset: String,
    pub input_amount: Decimal,
    pub min_output_amount: Decimal,
    pub side: OrderSide,
    pub fee: Decimal,
}

/// Aggregate request covering a whole batch; submitted in a single call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub batch_id: u64,
    /// Legs in commitment (FIFO) order
    pub legs: Vec<SettlementLeg>,
    pub total_fees: Decimal,
    pub fee_recipient: String,
    pub closed_at: DateTime<Utc>,
}

impl BatchDescriptor {
    /// Build the descriptor for a batch, computing each order's fee
    ///
    /// Fails with `AmountOverflow` if a fee or the fee total does not fit.
    pub fn from_batch(batch: &Batch, fee_rate: Decimal, fee_recipient: &str) -> Result<Self> {
        let mut legs = Vec::with_capacity(batch.len());
        let mut total_fees = Decimal::ZERO;

        for order in &batch.orders {
            let fee = order.fee(fee_rate).ok_or_else(|| {
                EngineError::AmountOverflow(format!("fee of order {} at rate {}", order.id, fee_rate))
            })?;
            total_fees = total_fees.checked_add(fee).ok_or_else(|| {
                EngineError::AmountOverflow(format!("total fees of batch {}", batch.id))
            })?;
            legs.push(SettlementLeg {
                order_id: order.id.clone(),
                requester: order.requester.clone(),
                input_asset: order.input_asset.clone(),
                output_asset: order.output_asset.clone(),
                input_amount: order.input_amount,
                min_output_amount: order.min_output_amount,
                side: order.side,
                fee,
            });
        }

        Ok(Self {
            batch_id: batch.id,
            legs,
            total_fees,
            fee_recipient: fee_recipient.to_string(),
            closed_at: batch.closed_at,
        })
    }

    pub fn order_count(&self) -> usize {
        self.legs.len()
    }
}

/// Handle returned by an external collaborator once an action is final
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Opaque reference (e.g. transaction hash)
    pub handle: String,
    pub confirmed_at: DateTime<Utc>,
}

impl Confirmation {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            confirmed_at: Utc::now(),
        }
    }
}

/// Atomic multi-order settlement.
///
/// A batch either settles completely or not at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    async fn submit(
        &self,
        batch: &BatchDescriptor,
    ) -> std::result::Result<Confirmation, BackendError>;
}

/// Pays collected fees to their recipient
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutCollaborator: Send + Sync {
    async fn pay(
        &self,
        amount: Decimal,
        recipient: &str,
    ) -> std::result::Result<Confirmation, PayoutError>;
}
