//! Core types and storage ports for the callplane control plane.
//!
//! This crate holds the vocabulary shared by every other callplane crate:
//!
//! - **Identifiers**: node ids, tenant ids, inbound numbers (DIDs) and
//!   canonical E.164 numbers.
//! - **Fleet records**: durable node attributes and live load metrics.
//! - **Storage ports**: async traits the relational collaborator implements.
//! - **Deadlines**: caller-supplied bounds for every external lookup.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

mod deadline;
mod error;
mod ids;
mod node;
pub mod store;

pub use deadline::{Deadline, DeadlineExceeded};
pub use error::StoreError;
pub use ids::{CanonicalNumber, Did, InvalidNumber, NodeId, TenantId};
pub use node::{Capability, LoadMetrics, Node, NodeKind};
pub use store::{
    BlocklistStore, CarrierRegistry, DidStore, NodeStore, WhitelistEntry, WhitelistStore,
};
