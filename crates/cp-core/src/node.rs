//! Durable fleet records and live load metrics.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Fleet node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// RTP media relay.
    MediaRelay,
    /// SIP signalling router.
    SipRouter,
}

impl NodeKind {
    /// All kinds, in registry order.
    pub const ALL: [Self; 2] = [Self::MediaRelay, Self::SipRouter];

    /// Whether nodes of this kind are partitioned by region.
    #[must_use]
    pub const fn is_regional(self) -> bool {
        matches!(self, Self::SipRouter)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MediaRelay => write!(f, "media-relay"),
            Self::SipRouter => write!(f, "sip-router"),
        }
    }
}

/// Capability flags advertised by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Tuned for WebRTC media (ICE/DTLS termination).
    RtcOptimized,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RtcOptimized => write!(f, "rtc-optimized"),
        }
    }
}

/// Durable node attributes owned by the registry.
///
/// Live health is not stored here: it is owned by the membership table
/// and joined by [`NodeId`] at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Durable id.
    pub id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Address reachable by carriers and clients.
    pub public_addr: IpAddr,
    /// Address used inside the fleet (gossip, control traffic).
    pub private_addr: IpAddr,
    /// Region, for SIP routers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Capability flags.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl Node {
    /// Create a node with no region and no capabilities.
    #[must_use]
    pub const fn new(id: NodeId, kind: NodeKind, public_addr: IpAddr, private_addr: IpAddr) -> Self {
        Self {
            id,
            kind,
            public_addr,
            private_addr,
            region: None,
            capabilities: BTreeSet::new(),
        }
    }

    /// Set the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Add a capability flag.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Whether the node advertises `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Whether the node sits in `region` (case-insensitive).
    #[must_use]
    pub fn in_region(&self, region: &str) -> bool {
        self.region
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(region.trim()))
    }
}

/// Live load reported by a node through gossip.
///
/// Decoded values go through [`LoadMetrics::new`], so the CPU bound holds for
/// reports read off the wire too.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawLoad")]
pub struct LoadMetrics {
    /// Calls currently handled.
    pub active_calls: u32,
    /// CPU utilization, 0.0..=100.0.
    pub cpu_pct: f32,
}

impl LoadMetrics {
    /// Create metrics, clamping CPU into `0.0..=100.0` (NaN becomes 0).
    #[must_use]
    pub fn new(active_calls: u32, cpu_pct: f32) -> Self {
        let cpu_pct = if cpu_pct.is_nan() {
            0.0
        } else {
            cpu_pct.clamp(0.0, 100.0)
        };
        Self {
            active_calls,
            cpu_pct,
        }
    }
}

#[derive(Deserialize)]
struct RawLoad {
    active_calls: u32,
    cpu_pct: f32,
}

impl From<RawLoad> for LoadMetrics {
    fn from(raw: RawLoad) -> Self {
        Self::new(raw.active_calls, raw.cpu_pct)
    }
}
