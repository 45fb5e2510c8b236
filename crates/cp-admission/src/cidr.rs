//! Carrier whitelist gate.
//!
//! A source address is admitted for a DID when it falls inside a network
//! whitelisted for that DID in either carrier registry. Platform providers
//! are consulted first, then customer carriers.
//!
//! Every row of a consulted registry is parsed before matching; a malformed
//! row fails the whole check rather than being skipped.

use std::net::IpAddr;
use std::sync::Arc;

use cp_core::{CarrierRegistry, Deadline, Did, WhitelistEntry, WhitelistStore};
use ipnet::IpNet;
use tracing::{debug, info, warn};

use crate::AdmissionCheckFailed;

/// Which whitelist row admitted the traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizedBy {
    pub registry: CarrierRegistry,
    pub network: IpNet,
}

/// Outcome of a whitelist check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Authorized(AuthorizedBy),
    Denied,
}

impl Admission {
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// Network described by a whitelist row.
///
/// The row's `range` may be `"/n"`, `"n"`, or empty; empty means a host
/// route. A prefix embedded in `ip` is honoured when `range` is empty.
/// IPv4-mapped IPv6 addresses are treated as IPv4.
///
/// # Errors
/// Returns [`AdmissionCheckFailed::MalformedNetwork`] when the row does not
/// describe a valid network.
pub fn effective_network(entry: &WhitelistEntry) -> Result<IpNet, AdmissionCheckFailed> {
    let malformed = |reason: &str| AdmissionCheckFailed::MalformedNetwork {
        registry: entry.registry,
        ip: entry.ip.clone(),
        range: entry.range.clone(),
        reason: reason.to_string(),
    };

    let raw_ip = entry.ip.trim();
    let (addr_part, embedded) = match raw_ip.split_once('/') {
        Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
        None => (raw_ip, None),
    };
    let range = entry
        .range
        .as_deref()
        .map(str::trim)
        .filter(|range| !range.is_empty())
        .map(|range| range.strip_prefix('/').unwrap_or(range).trim());

    let prefix = match (embedded, range) {
        (Some(a), Some(b)) if a != b => return Err(malformed("conflicting prefix lengths")),
        (Some(prefix), _) | (None, Some(prefix)) => Some(
            prefix
                .parse::<u8>()
                .map_err(|_| malformed("prefix length is not a number"))?,
        ),
        (None, None) => None,
    };

    let addr: IpAddr = addr_part
        .parse()
        .map_err(|_| malformed("address is not an IP address"))?;
    let (addr, prefix) = canonical_network(addr, prefix);
    let prefix = prefix.unwrap_or(match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    });

    IpNet::new(addr, prefix).map_err(|_| malformed("prefix length out of range"))
}

fn canonical_network(addr: IpAddr, prefix: Option<u8>) -> (IpAddr, Option<u8>) {
    if let IpAddr::V6(v6) = addr {
        if let Some(v4) = v6.to_ipv4_mapped() {
            match prefix {
                None => return (IpAddr::V4(v4), None),
                Some(p) if (96..=128).contains(&p) => return (IpAddr::V4(v4), Some(p - 96)),
                Some(_) => {}
            }
        }
    }
    (addr, prefix)
}

fn parse_source(source: &str) -> Result<IpAddr, AdmissionCheckFailed> {
    source
        .trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical())
        .map_err(|_| AdmissionCheckFailed::MalformedSourceAddress(source.to_string()))
}

/// First row in `entries` whose network contains `source`.
///
/// # Errors
/// Fails if any row is malformed, even when another row would match.
pub fn match_entries(
    entries: &[WhitelistEntry],
    source: IpAddr,
) -> Result<Option<AuthorizedBy>, AdmissionCheckFailed> {
    let networks = entries
        .iter()
        .map(|entry| effective_network(entry).map(|network| (entry.registry, network)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(networks
        .into_iter()
        .find(|(_, network)| network.contains(&source))
        .map(|(registry, network)| AuthorizedBy { registry, network }))
}

/// Whitelist gate over a [`WhitelistStore`].
#[derive(Clone)]
pub struct CidrGate {
    store: Arc<dyn WhitelistStore>,
}

impl std::fmt::Debug for CidrGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CidrGate").finish_non_exhaustive()
    }
}

impl CidrGate {
    #[must_use]
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self { store }
    }

    /// Decide whether `source` may send traffic for `did`.
    ///
    /// # Errors
    /// Returns [`AdmissionCheckFailed`] if the source is not an IP address,
    /// a consulted row is malformed, or the store fails or misses `deadline`.
    pub async fn authorize(
        &self,
        did: &Did,
        source: &str,
        deadline: Deadline,
    ) -> Result<Admission, AdmissionCheckFailed> {
        let source_ip = parse_source(source).inspect_err(|err| {
            warn!(did = %did, error = %err, "cannot evaluate carrier whitelist");
        })?;

        for registry in CarrierRegistry::LOOKUP_ORDER {
            let matched = deadline
                .run(self.store.whitelist_entries(registry, did))
                .await
                .map_err(AdmissionCheckFailed::from)
                .and_then(|rows| rows.map_err(AdmissionCheckFailed::from))
                .and_then(|rows| match_entries(&rows, source_ip))
                .inspect_err(|err| {
                    warn!(did = %did, %registry, error = %err, "cannot evaluate carrier whitelist");
                })?;

            if let Some(matched) = matched {
                info!(
                    did = %did,
                    source = %source_ip,
                    registry = %matched.registry,
                    network = %matched.network,
                    "carrier traffic authorized"
                );
                return Ok(Admission::Authorized(matched));
            }
        }

        debug!(did = %did, source = %source_ip, "carrier traffic denied");
        Ok(Admission::Denied)
    }
}
