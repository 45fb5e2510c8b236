//! Error types for gossip and placement.

use cp_core::NodeKind;
use cp_registry::RegistryUnavailable;

/// Gossip transport, codec and lifecycle errors.
///
/// None of these are returned for lost or late messages; those are part of
/// normal operation.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    /// Socket-level failure.
    #[error("gossip transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be serialized.
    #[error("failed to encode gossip message: {0}")]
    Encode(String),

    /// A datagram was not a valid gossip message.
    #[error("failed to decode gossip message: {0}")]
    Decode(String),

    /// A message does not fit in one datagram even without piggybacked updates.
    #[error("gossip message of {len} bytes exceeds datagram limit of {limit}")]
    Oversized { len: usize, limit: usize },

    /// Inconsistent gossip timings.
    #[error("invalid gossip configuration: {0}")]
    InvalidConfig(String),

    /// The transport has been shut down.
    #[error("gossip transport closed")]
    Closed,

    /// The agent task panicked or was aborted.
    #[error("gossip agent task failed: {0}")]
    Task(String),
}

/// Placement failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// No registered node of `kind` is healthy and matches the constraints.
    #[error("no {kind} candidate available")]
    NoCandidateAvailable { kind: NodeKind },

    /// The registry could not be read.
    #[error(transparent)]
    RegistryUnavailable(#[from] RegistryUnavailable),
}
