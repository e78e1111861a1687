pub mod batch;
pub mod order;

pub use batch::{
    Batch, BatchFailure, CloseReason, CollectionReceipt, SettlementEvent, SettlementReceipt,
};
pub use order::{Order, OrderId, OrderRequest, OrderSide, OrderStatus};
