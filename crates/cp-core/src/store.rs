//! Storage ports consumed by the control plane.
//!
//! The relational collaborator implements these traits with parameterized
//! lookups keyed by id, DID, or number. The control plane only reads through
//! them; it never mutates whitelist, blocklist, ownership, or registry data.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CanonicalNumber, Did, Node, NodeId, NodeKind, StoreError, TenantId};

// ─────────────────────────────────────────────────────────────────────────────
// Whitelist records
// ─────────────────────────────────────────────────────────────────────────────

/// The two independent carrier whitelist registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CarrierRegistry {
    /// Platform-managed SIP providers.
    PlatformProvider,
    /// Customer-brought carriers.
    CustomerCarrier,
}

impl CarrierRegistry {
    /// Lookup order: platform providers are the common case.
    pub const LOOKUP_ORDER: [Self; 2] = [Self::PlatformProvider, Self::CustomerCarrier];
}

impl fmt::Display for CarrierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlatformProvider => write!(f, "platform-provider"),
            Self::CustomerCarrier => write!(f, "customer-carrier"),
        }
    }
}

/// A carrier whitelist row as stored.
///
/// `ip` and `range` are kept as raw strings: they are operator-entered and
/// may be malformed, which the admission gate must report rather than skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Registry the row belongs to.
    pub registry: CarrierRegistry,
    /// Inbound number the row authorizes.
    pub did: Did,
    /// Carrier address.
    pub ip: String,
    /// Optional range suffix (`/24`, `24`, or empty).
    #[serde(default)]
    pub range: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Ports
// ─────────────────────────────────────────────────────────────────────────────

/// Durable node attributes.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// All nodes of `kind`, in any order.
    async fn nodes(&self, kind: NodeKind) -> Result<Vec<Node>, StoreError>;

    /// A single node by id.
    async fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError>;
}

/// Carrier whitelist rows for both registries.
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Rows in `registry` scoped to `did`.
    async fn whitelist_entries(
        &self,
        registry: CarrierRegistry,
        did: &Did,
    ) -> Result<Vec<WhitelistEntry>, StoreError>;
}

/// Tenant blocklists.
#[async_trait]
pub trait BlocklistStore: Send + Sync {
    /// Whether `number` is barred for `tenant`.
    async fn is_blocked(&self, tenant: TenantId, number: &CanonicalNumber)
    -> Result<bool, StoreError>;
}

/// DID ownership records.
#[async_trait]
pub trait DidStore: Send + Sync {
    /// Whether `tenant` owns `number` as a provisioned DID.
    async fn owns_did(&self, tenant: TenantId, number: &CanonicalNumber)
    -> Result<bool, StoreError>;
}
