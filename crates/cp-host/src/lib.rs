//! Callplane node host.
//!
//! Loads the node configuration and wires the stores, membership view and
//! admission checks into a [`CallPlane`]. The `callplane-agent` binary runs
//! the gossip agent for one node.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod plane;

pub use config::{AdmissionSection, CallplaneConfig, ConfigError, NodeSection};
pub use plane::{
    CallPlane, CallPlaneError, InboundCall, InboundDecision, MediaProfile, OutboundCall,
    OutboundDecision,
};
