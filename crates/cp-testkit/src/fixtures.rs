//! Fleet fixtures.
//!
//! Node `n` gets public address `198.51.100.n` and private address `10.0.0.n`
//! (both truncated to the low byte of the id).

use std::net::{IpAddr, Ipv4Addr};

use cp_core::{CanonicalNumber, Capability, Node, NodeId, NodeKind};

fn octet(id: u64) -> u8 {
    (id & 0xff) as u8
}

/// Public address used for node `id`.
#[must_use]
pub fn public_addr(id: u64) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(198, 51, 100, octet(id)))
}

/// Private address used for node `id`.
#[must_use]
pub fn private_addr(id: u64) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet(id)))
}

/// A plain media relay.
#[must_use]
pub fn media_relay(id: u64) -> Node {
    Node::new(
        NodeId::new(id),
        NodeKind::MediaRelay,
        public_addr(id),
        private_addr(id),
    )
}

/// An RTC-optimized media relay.
#[must_use]
pub fn rtc_media_relay(id: u64) -> Node {
    media_relay(id).with_capability(Capability::RtcOptimized)
}

/// A SIP router in `region`.
#[must_use]
pub fn sip_router(id: u64, region: &str) -> Node {
    Node::new(
        NodeId::new(id),
        NodeKind::SipRouter,
        public_addr(id),
        private_addr(id),
    )
    .with_region(region)
}

/// Canonical number from an E.164 literal.
///
/// # Panics
/// Panics if `raw` is not E.164.
#[must_use]
pub fn number(raw: &str) -> CanonicalNumber {
    CanonicalNumber::from_e164(raw).expect("fixture number must be E.164")
}
