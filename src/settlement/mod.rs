//! Settlement collaborators
//!
//! The engine reaches the outside world only through these traits: one
//! atomic submit per batch, and one payout per fee collection.

pub mod dry_run;
pub mod traits;

pub use dry_run::{DryRunPayout, DryRunSettlementBackend};
pub use traits::{
    BatchDescriptor, Confirmation, PayoutCollaborator, SettlementBackend, SettlementLeg,
};
