//! Storage doubles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cp_core::{
    BlocklistStore, CanonicalNumber, CarrierRegistry, Did, DidStore, Node, NodeId, NodeKind,
    NodeStore, StoreError, TenantId, WhitelistEntry, WhitelistStore,
};
use parking_lot::Mutex;

/// Every port fails with [`StoreError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

fn unavailable<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl NodeStore for UnavailableStore {
    async fn nodes(&self, _kind: NodeKind) -> Result<Vec<Node>, StoreError> {
        unavailable()
    }

    async fn node(&self, _id: NodeId) -> Result<Option<Node>, StoreError> {
        unavailable()
    }
}

#[async_trait]
impl WhitelistStore for UnavailableStore {
    async fn whitelist_entries(
        &self,
        _registry: CarrierRegistry,
        _did: &Did,
    ) -> Result<Vec<WhitelistEntry>, StoreError> {
        unavailable()
    }
}

#[async_trait]
impl BlocklistStore for UnavailableStore {
    async fn is_blocked(
        &self,
        _tenant: TenantId,
        _number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        unavailable()
    }
}

#[async_trait]
impl DidStore for UnavailableStore {
    async fn owns_did(
        &self,
        _tenant: TenantId,
        _number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        unavailable()
    }
}

/// Every port never answers. Pair with a short deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct StallingStore;

#[async_trait]
impl NodeStore for StallingStore {
    async fn nodes(&self, _kind: NodeKind) -> Result<Vec<Node>, StoreError> {
        std::future::pending().await
    }

    async fn node(&self, _id: NodeId) -> Result<Option<Node>, StoreError> {
        std::future::pending().await
    }
}

#[async_trait]
impl WhitelistStore for StallingStore {
    async fn whitelist_entries(
        &self,
        _registry: CarrierRegistry,
        _did: &Did,
    ) -> Result<Vec<WhitelistEntry>, StoreError> {
        std::future::pending().await
    }
}

#[async_trait]
impl BlocklistStore for StallingStore {
    async fn is_blocked(
        &self,
        _tenant: TenantId,
        _number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        std::future::pending().await
    }
}

#[async_trait]
impl DidStore for StallingStore {
    async fn owns_did(
        &self,
        _tenant: TenantId,
        _number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        std::future::pending().await
    }
}

/// Wraps a store and counts calls per port method.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl<S> CountingStore<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of calls made to `method` (e.g. `"whitelist_entries"`).
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) {
        *self.calls.lock().entry(method).or_insert(0) += 1;
    }
}

#[async_trait]
impl<S: NodeStore> NodeStore for CountingStore<S> {
    async fn nodes(&self, kind: NodeKind) -> Result<Vec<Node>, StoreError> {
        self.record("nodes");
        self.inner.nodes(kind).await
    }

    async fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        self.record("node");
        self.inner.node(id).await
    }
}

#[async_trait]
impl<S: WhitelistStore> WhitelistStore for CountingStore<S> {
    async fn whitelist_entries(
        &self,
        registry: CarrierRegistry,
        did: &Did,
    ) -> Result<Vec<WhitelistEntry>, StoreError> {
        self.record("whitelist_entries");
        self.inner.whitelist_entries(registry, did).await
    }
}

#[async_trait]
impl<S: BlocklistStore> BlocklistStore for CountingStore<S> {
    async fn is_blocked(
        &self,
        tenant: TenantId,
        number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        self.record("is_blocked");
        self.inner.is_blocked(tenant, number).await
    }
}

#[async_trait]
impl<S: DidStore> DidStore for CountingStore<S> {
    async fn owns_did(
        &self,
        tenant: TenantId,
        number: &CanonicalNumber,
    ) -> Result<bool, StoreError> {
        self.record("owns_did");
        self.inner.owns_did(tenant, number).await
    }
}
