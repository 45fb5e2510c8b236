//! Node registry: durable attributes of media relays and SIP routers.
//!
//! The registry is a read-only view over a [`NodeStore`]. It never talks to
//! the nodes themselves; live health lives in the gossip layer and is joined
//! by node id at selection time.

#![forbid(unsafe_code)]

use std::sync::Arc;

use cp_core::{Deadline, DeadlineExceeded, Node, NodeId, NodeKind, NodeStore, StoreError};
use tracing::{debug, warn};

/// The registry could not answer within its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryUnavailable {
    /// The backing store failed.
    #[error("node registry unavailable: {0}")]
    Store(#[from] StoreError),

    /// The lookup did not complete before the caller's deadline.
    #[error("node registry lookup exceeded its deadline")]
    DeadlineExceeded,
}

impl From<DeadlineExceeded> for RegistryUnavailable {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

/// Read access to durable node records.
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn NodeStore>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry").finish_non_exhaustive()
    }
}

impl NodeRegistry {
    /// Create a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Nodes of `kind`, ordered by id.
    ///
    /// `region` filters SIP routers (case-insensitive). Media relays carry no
    /// region and the filter is ignored for them.
    ///
    /// # Errors
    /// Returns [`RegistryUnavailable`] on store failure or deadline expiry.
    pub async fn list_nodes(
        &self,
        kind: NodeKind,
        region: Option<&str>,
        deadline: Deadline,
    ) -> Result<Vec<Node>, RegistryUnavailable> {
        let mut nodes = self.fetch(kind, deadline).await?;
        if let Some(region) = region.filter(|_| kind.is_regional()) {
            nodes.retain(|node| node.in_region(region));
        }
        debug!(%kind, region, count = nodes.len(), "listed registry nodes");
        Ok(nodes)
    }

    /// Every node of every kind, ordered by id.
    ///
    /// # Errors
    /// Returns [`RegistryUnavailable`] on store failure or deadline expiry.
    pub async fn list_all(&self, deadline: Deadline) -> Result<Vec<Node>, RegistryUnavailable> {
        let mut all = Vec::new();
        for kind in NodeKind::ALL {
            all.extend(self.fetch(kind, deadline).await?);
        }
        all.sort_by_key(|node| node.id);
        Ok(all)
    }

    /// A single node by id.
    ///
    /// # Errors
    /// Returns [`RegistryUnavailable`] on store failure or deadline expiry.
    pub async fn get_node(
        &self,
        id: NodeId,
        deadline: Deadline,
    ) -> Result<Option<Node>, RegistryUnavailable> {
        deadline
            .run(self.store.node(id))
            .await
            .map_err(RegistryUnavailable::from)?
            .map_err(|err| {
                warn!(node_id = %id, error = %err, "registry lookup failed");
                RegistryUnavailable::from(err)
            })
    }

    async fn fetch(
        &self,
        kind: NodeKind,
        deadline: Deadline,
    ) -> Result<Vec<Node>, RegistryUnavailable> {
        let result = deadline.run(self.store.nodes(kind)).await;
        let mut nodes = match result {
            Ok(Ok(nodes)) => nodes,
            Ok(Err(err)) => {
                warn!(%kind, error = %err, "registry store failed");
                return Err(err.into());
            }
            Err(DeadlineExceeded) => {
                warn!(%kind, "registry lookup exceeded deadline");
                return Err(RegistryUnavailable::DeadlineExceeded);
            }
        };
        nodes.sort_by_key(|node| node.id);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_store::MemoryStore;
    use cp_testkit::{StallingStore, UnavailableStore, media_relay, sip_router};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn registry() -> NodeRegistry {
        let store = MemoryStore::new();
        store.upsert_node(media_relay(3));
        store.upsert_node(media_relay(1));
        store.upsert_node(sip_router(2, "us-east"));
        store.upsert_node(sip_router(4, "eu-west"));
        store.upsert_node(sip_router(5, "US-East"));
        NodeRegistry::new(Arc::new(store))
    }

    fn ids(nodes: &[Node]) -> Vec<u64> {
        nodes.iter().map(|node| node.id.get()).collect()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn list_nodes_orders_by_id() {
        let nodes = registry()
            .list_nodes(NodeKind::MediaRelay, None, deadline())
            .await
            .expect("list");
        assert_eq!(ids(&nodes), vec![1, 3]);
    }

    #[tokio::test]
    async fn region_filter_applies_to_sip_routers() {
        let registry = registry();
        let routers = registry
            .list_nodes(NodeKind::SipRouter, Some("us-east"), deadline())
            .await
            .expect("list");
        assert_eq!(ids(&routers), vec![2, 5]);

        let relays = registry
            .list_nodes(NodeKind::MediaRelay, Some("us-east"), deadline())
            .await
            .expect("list");
        assert_eq!(ids(&relays), vec![1, 3]);
    }

    #[tokio::test]
    async fn list_all_and_get_node() {
        let registry = registry();
        let all = registry.list_all(deadline()).await.expect("list");
        assert_eq!(ids(&all), vec![1, 2, 3, 4, 5]);

        let node = registry
            .get_node(NodeId::new(4), deadline())
            .await
            .expect("get");
        assert_eq!(node.and_then(|n| n.region), Some("eu-west".to_string()));
        assert!(
            registry
                .get_node(NodeId::new(42), deadline())
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn store_failure_is_unavailable() {
        let registry = NodeRegistry::new(Arc::new(UnavailableStore));
        let err = registry
            .list_nodes(NodeKind::MediaRelay, None, deadline())
            .await
            .expect_err("unavailable");
        assert!(matches!(err, RegistryUnavailable::Store(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_hits_deadline() {
        let registry = NodeRegistry::new(Arc::new(StallingStore));
        let err = registry
            .list_all(Deadline::after(Duration::from_millis(100)))
            .await
            .expect_err("deadline");
        assert_eq!(err, RegistryUnavailable::DeadlineExceeded);
    }
}
