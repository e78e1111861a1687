use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque order identifier, unique for the lifetime of an engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Engine-assigned id for requests that do not carry one
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Order side (buy or sell)
///
/// Presentation and accounting label only; settlement treats both sides the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted and waiting for a batch
    Queued,
    /// Drained into a batch that is being settled
    Settling,
    /// Batch settled successfully
    Settled,
    /// Batch settlement failed
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Settled | OrderStatus::Failed)
    }

    /// Status only moves forward: queued -> settling -> {settled, failed}.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Queued, OrderStatus::Settling)
                | (OrderStatus::Settling, OrderStatus::Settled)
                | (OrderStatus::Settling, OrderStatus::Failed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Queued => "queued",
            OrderStatus::Settling => "settling",
            OrderStatus::Settled => "settled",
            OrderStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Order request (what a caller submits)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-supplied id; the engine assigns one when absent
    #[serde(default)]
    pub id: Option<OrderId>,
    pub requester: String,
    pub input_asset: String,
    pub output_asset: String,
    pub input_amount: Decimal,
    /// Slippage floor; zero means no floor
    #[serde(default)]
    pub min_output_amount: Decimal,
    pub side: OrderSide,
}

impl OrderRequest {
    pub fn new(
        requester: impl Into<String>,
        input_asset: impl Into<String>,
        output_asset: impl Into<String>,
        input_amount: Decimal,
        side: OrderSide,
    ) -> Self {
        Self {
            id: None,
            requester: requester.into(),
            input_asset: input_asset.into(),
            output_asset: output_asset.into(),
            input_amount,
            min_output_amount: Decimal::ZERO,
            side,
        }
    }

    pub fn with_id(mut self, id: impl Into<OrderId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_min_output(mut self, min_output_amount: Decimal) -> Self {
        self.min_output_amount = min_output_amount;
        self
    }
}

/// A trade intent accepted into the queue
///
/// Orders are value objects: the engine hands out copies, and only `status`
/// changes after acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub requester: String,
    pub input_asset: String,
    pub output_asset: String,
    pub input_amount: Decimal,
    pub min_output_amount: Decimal,
    pub side: OrderSide,
    pub submitted_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl Order {
    /// Build a queued order from a request, assigning an id if needed
    pub fn from_request(request: OrderRequest, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: request.id.unwrap_or_else(OrderId::generate),
            requester: request.requester,
            input_asset: request.input_asset,
            output_asset: request.output_asset,
            input_amount: request.input_amount,
            min_output_amount: request.min_output_amount,
            side: request.side,
            submitted_at,
            status: OrderStatus::Queued,
        }
    }

    /// Fee owed on this order at the given rate; `None` on overflow
    pub fn fee(&self, fee_rate: Decimal) -> Option<Decimal> {
        self.input_amount.checked_mul(fee_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_moves_forward_only() {
        assert!(OrderStatus::Queued.can_transition_to(OrderStatus::Settling));
        assert!(OrderStatus::Settling.can_transition_to(OrderStatus::Settled));
        assert!(OrderStatus::Settling.can_transition_to(OrderStatus::Failed));

        assert!(!OrderStatus::Settling.can_transition_to(OrderStatus::Queued));
        assert!(!OrderStatus::Settled.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Settled));
        assert!(!OrderStatus::Queued.can_transition_to(OrderStatus::Settled));
        assert!(!OrderStatus::Queued.can_transition_to(OrderStatus::Failed));
    }

    #[test]
    fn test_from_request_assigns_id_when_missing() {
        let request = OrderRequest::new("0xabc", "ETH", "USDC", dec!(1), OrderSide::Sell);
        let order = Order::from_request(request, Utc::now());
        assert!(!order.id.as_str().is_empty());
        assert_eq!(order.status, OrderStatus::Queued);
    }

    #[test]
    fn test_from_request_keeps_caller_id() {
        let request =
            OrderRequest::new("0xabc", "ETH", "USDC", dec!(1), OrderSide::Buy).with_id("order-1");
        let order = Order::from_request(request, Utc::now());
        assert_eq!(order.id, OrderId::new("order-1"));
    }

    #[test]
    fn test_fee() {
        let request = OrderRequest::new("0xabc", "ETH", "USDC", dec!(1000000), OrderSide::Buy);
        let order = Order::from_request(request, Utc::now());
        assert_eq!(order.fee(dec!(0.002)), Some(dec!(2000)));
        assert_eq!(order.fee(Decimal::MAX), None);
    }
}
