//! Lock-protected in-memory maps implementing the storage ports.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use cp_core::{
    BlocklistStore, CanonicalNumber, CarrierRegistry, Did, DidStore, Node, NodeId, NodeKind,
    NodeStore, StoreError, TenantId, WhitelistEntry, WhitelistStore,
};
use parking_lot::RwLock;
use tracing::debug;

use crate::SeedData;

/// In-memory store for nodes, whitelists, blocklists and DID ownership.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    whitelist: RwLock<Vec<WhitelistEntry>>,
    blocklist: RwLock<HashSet<(TenantId, CanonicalNumber)>>,
    dids: RwLock<HashSet<(TenantId, CanonicalNumber)>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `seed`.
    #[must_use]
    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        store.apply_seed(seed);
        store
    }

    /// Merge `seed` into the store. Nodes with an existing id are replaced.
    pub fn apply_seed(&self, seed: SeedData) {
        debug!(
            nodes = seed.nodes.len(),
            whitelist = seed.whitelist.len(),
            blocklist = seed.blocklist.len(),
            dids = seed.dids.len(),
            "applying seed data"
        );
        for node in seed.nodes {
            self.upsert_node(node);
        }
        self.whitelist.write().extend(seed.whitelist);
        self.blocklist
            .write()
            .extend(seed.blocklist.into_iter().map(|row| (row.tenant, row.number)));
        self.dids
            .write()
            .extend(seed.dids.into_iter().map(|row| (row.tenant, row.number)));
    }

    /// Insert or replace a node record.
    pub fn upsert_node(&self, node: Node) {
        self.nodes.write().insert(node.id, node);
    }

    /// Remove a node record, returning it if present.
    pub fn remove_node(&self, id: NodeId) -> Option<Node> {
        self.nodes.write().remove(&id)
    }

    /// Add a carrier whitelist row.
    pub fn add_whitelist_entry(&self, entry: WhitelistEntry) {
        self.whitelist.write().push(entry);
    }

    /// Bar `number` for `tenant`.
    pub fn block_number(&self, tenant: TenantId, number: CanonicalNumber) {
        self.blocklist.write().insert((tenant, number));
    }

    /// Record that `tenant` owns `number`.
    pub fn assign_did(&self, tenant: TenantId, number: CanonicalNumber) {
        self.dids.write().insert((tenant, number));
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn nodes(&self, kind: NodeKind) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|node| node.kind == kind)
            .cloned()
            .collect())
    }

    async fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.read().get(&id).cloned())
    }
}

#[async_trait]
impl WhitelistStore for MemoryStore {
    async fn whitelist_entries(
        &self,
        registry: CarrierRegistry,
        did: &Did,
    ) -> Result<Vec<WhitelistEntry>, StoreError> {
        Ok(self
            .whitelist
            .read()
            .iter()
            .filter(|entry| entry.registry == registry && &entry.did == did)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BlocklistStore for MemoryStore {
    async fn is_blocked(
        &self,
        tenant: TenantId,
        number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        Ok(self.blocklist.read().contains(&(tenant, number.clone())))
    }
}

#[async_trait]
impl DidStore for MemoryStore {
    async fn owns_did(
        &self,
        tenant: TenantId,
        number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        Ok(self.dids.read().contains(&(tenant, number.clone())))
    }
}
