//! Fleet membership and node placement for callplane.
//!
//! This crate tracks which media relays and SIP routers are reachable and
//! how loaded they are, and picks a node for each new call:
//!
//! - [`membership`]: per-observer member state machine (`unknown → alive →
//!   suspect → dead`) with versioned, idempotent updates.
//! - [`message`]: CBOR wire messages (ping, ack, indirect ping, local report).
//! - [`transport`]: datagram transport seam with UDP and in-memory backends.
//! - [`agent`]: the always-on probe/dissemination loop.
//! - [`selector`]: registry ∩ membership join and load-aware ranking.
//!
//! Message loss is expected and never surfaced as an error; correctness only
//! depends on eventual convergence.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod config;
pub mod error;
pub mod membership;
pub mod message;
pub mod selector;
pub mod transport;

pub use agent::{AgentHandle, GossipAgent, wall_clock_incarnation};
pub use config::GossipConfig;
pub use error::{GossipError, PlacementError};
pub use membership::{
    Evidence, Liveness, MemberSnapshot, MemberStatus, MemberUpdate, MembershipEvent,
    MembershipTable, PlacementHealth, UpdateOutcome, Version,
};
pub use message::GossipMessage;
pub use selector::{
    Candidate, Exclusion, LoadBalancer, PlacementConstraints, Ranking, rank,
};
pub use transport::{GossipTransport, MemoryNetwork, MemoryTransport, UdpTransport};
