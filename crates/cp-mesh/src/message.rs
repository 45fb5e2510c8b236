//! Gossip wire messages.
//!
//! Messages are CBOR-encoded, one per datagram. Every probe message carries
//! piggybacked [`MemberUpdate`]s, the sender's own update first; when a
//! message would not fit in a datagram the trailing updates are dropped.

use std::net::SocketAddr;

use cp_core::NodeId;
use serde::{Deserialize, Serialize};

use crate::{GossipError, MemberUpdate};

/// A gossip datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GossipMessage {
    /// Direct probe.
    Ping {
        from: NodeId,
        probe_id: u64,
        updates: Vec<MemberUpdate>,
    },
    /// Answer to a ping, or a relayed answer to an indirect probe.
    Ack {
        from: NodeId,
        probe_id: u64,
        /// The member whose reachability this ack confirms.
        target: NodeId,
        updates: Vec<MemberUpdate>,
    },
    /// Ask the receiver to probe `target` on the sender's behalf.
    PingReq {
        from: NodeId,
        probe_id: u64,
        target: NodeId,
        target_addr: SocketAddr,
        updates: Vec<MemberUpdate>,
    },
    /// Local metrics push from a process on the same host.
    Report { active_calls: u32, cpu_pct: f32 },
}

impl GossipMessage {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::Ack { .. } => "ack",
            Self::PingReq { .. } => "ping_req",
            Self::Report { .. } => "report",
        }
    }

    /// Piggybacked updates, if this kind carries any.
    #[must_use]
    pub fn updates(&self) -> &[MemberUpdate] {
        match self {
            Self::Ping { updates, .. }
            | Self::Ack { updates, .. }
            | Self::PingReq { updates, .. } => updates,
            Self::Report { .. } => &[],
        }
    }

    fn updates_mut(&mut self) -> Option<&mut Vec<MemberUpdate>> {
        match self {
            Self::Ping { updates, .. }
            | Self::Ack { updates, .. }
            | Self::PingReq { updates, .. } => Some(updates),
            Self::Report { .. } => None,
        }
    }

    /// Encode to CBOR.
    ///
    /// # Errors
    /// Returns [`GossipError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, GossipError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| GossipError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Encode to at most `limit` bytes, dropping trailing piggybacked updates
    /// as needed.
    ///
    /// # Errors
    /// Returns [`GossipError::Oversized`] if the message does not fit even
    /// with no updates left.
    pub fn encode_bounded(mut self, limit: usize) -> Result<Vec<u8>, GossipError> {
        loop {
            let bytes = self.encode()?;
            if bytes.len() <= limit {
                return Ok(bytes);
            }
            match self.updates_mut() {
                Some(updates) if !updates.is_empty() => {
                    updates.pop();
                }
                _ => {
                    return Err(GossipError::Oversized {
                        len: bytes.len(),
                        limit,
                    });
                }
            }
        }
    }

    /// Decode from CBOR.
    ///
    /// # Errors
    /// Returns [`GossipError::Decode`] on malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, GossipError> {
        ciborium::from_reader(bytes).map_err(|e| GossipError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Liveness, Version};
    use cp_core::LoadMetrics;
    use pretty_assertions::assert_eq;

    fn update(id: u64) -> MemberUpdate {
        MemberUpdate {
            node_id: NodeId::new(id),
            version: Version {
                incarnation: 1_700_000_000_000,
                sequence: id,
            },
            liveness: Liveness::Alive,
            load: LoadMetrics::new(4, 37.5),
            addr: Some(SocketAddr::from(([10, 0, 0, 1], 7946))),
        }
    }

    #[test]
    fn ping_req_survives_the_wire() {
        let message = GossipMessage::PingReq {
            from: NodeId::new(1),
            probe_id: 42,
            target: NodeId::new(3),
            target_addr: SocketAddr::from(([10, 0, 0, 3], 7946)),
            updates: vec![update(1), update(2)],
        };
        let bytes = message.encode().expect("encode");
        assert_eq!(GossipMessage::decode(&bytes).expect("decode"), message);
    }

    #[test]
    fn out_of_range_load_is_clamped_on_decode() {
        let mut nan = update(1);
        nan.load = LoadMetrics {
            active_calls: 4,
            cpu_pct: f32::NAN,
        };
        let mut hot = update(2);
        hot.load = LoadMetrics {
            active_calls: 9,
            cpu_pct: 400.0,
        };
        let message = GossipMessage::Ack {
            from: NodeId::new(2),
            probe_id: 7,
            target: NodeId::new(2),
            updates: vec![nan, hot],
        };

        let decoded = GossipMessage::decode(&message.encode().expect("encode")).expect("decode");
        let loads: Vec<_> = decoded.updates().iter().map(|u| u.load).collect();
        assert_eq!(loads, vec![LoadMetrics::new(4, 0.0), LoadMetrics::new(9, 100.0)]);
    }

    #[test]
    fn bounded_encoding_drops_trailing_updates() {
        let message = GossipMessage::Ping {
            from: NodeId::new(1),
            probe_id: 1,
            updates: (1..=200).map(update).collect(),
        };
        let bytes = message.encode_bounded(1_400).expect("encode");
        assert!(bytes.len() <= 1_400);

        let decoded = GossipMessage::decode(&bytes).expect("decode");
        let updates = decoded.updates();
        assert!(!updates.is_empty());
        assert!(updates.len() < 200);
        assert_eq!(updates[0].node_id, NodeId::new(1));
    }

    #[test]
    fn report_that_cannot_fit_is_rejected() {
        let message = GossipMessage::Report {
            active_calls: 1,
            cpu_pct: 2.0,
        };
        assert!(matches!(
            message.encode_bounded(2),
            Err(GossipError::Oversized { .. })
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            GossipMessage::decode(&[0xff, 0x00, 0x13]),
            Err(GossipError::Decode(_))
        ));
    }
}
