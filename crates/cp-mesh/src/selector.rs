//! Load-aware node selection.
//!
//! Candidates are the registry's nodes joined with the local membership view
//! by node id. Only alive nodes heard from within `suspect_after_ms` plus the
//! staleness window, and suspect nodes heard from within the staleness
//! window, are eligible. Eligible nodes are ranked by:
//!
//! 1. capability match, when the capability is preferred rather than required
//! 2. active calls, ascending
//! 3. CPU utilization, ascending
//! 4. node id, ascending
//!
//! Selection is a pure read: it never contacts nodes and never retries.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use cp_core::{Capability, Deadline, LoadMetrics, Node, NodeId, NodeKind};
use cp_registry::NodeRegistry;
use tracing::{debug, info};

use crate::{MemberStatus, MembershipTable, PlacementError, PlacementHealth};

/// Placement constraints for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementConstraints {
    /// Capability to prefer or require.
    pub capability: Option<Capability>,
    /// Whether `capability` is mandatory.
    pub strict: bool,
    /// Region, applied to SIP routers.
    pub region: Option<String>,
}

impl PlacementConstraints {
    /// No constraints.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Only nodes advertising `capability`.
    #[must_use]
    pub const fn require(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self.strict = true;
        self
    }

    /// Prefer nodes advertising `capability`, but accept others.
    #[must_use]
    pub const fn prefer(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self.strict = false;
        self
    }

    /// Only nodes in `region`.
    #[must_use]
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Why a registered node was not a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Dead,
    /// Never contacted.
    Unknown,
    /// Suspect past the staleness window.
    Stale,
    /// Lacks a required capability.
    Capability,
    /// Outside the requested region.
    Region,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
            Self::Stale => write!(f, "stale"),
            Self::Capability => write!(f, "capability"),
            Self::Region => write!(f, "region"),
        }
    }
}

/// An eligible node with the live data it was ranked on.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub node: Node,
    pub status: MemberStatus,
    pub load: LoadMetrics,
    pub capability_match: bool,
}

/// Ordered candidates plus excluded nodes with reasons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub candidates: Vec<Candidate>,
    pub excluded: Vec<(NodeId, Exclusion)>,
}

impl Ranking {
    /// The best candidate, if any.
    #[must_use]
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

fn compare(a: &Candidate, b: &Candidate, prefer_capability: bool) -> Ordering {
    if prefer_capability {
        let capability_cmp = b.capability_match.cmp(&a.capability_match);
        if capability_cmp != Ordering::Equal {
            return capability_cmp;
        }
    }
    a.load
        .active_calls
        .cmp(&b.load.active_calls)
        .then_with(|| a.load.cpu_pct.total_cmp(&b.load.cpu_pct))
        .then_with(|| a.node.id.cmp(&b.node.id))
}

/// Rank `nodes` against the membership view at `now_ms`.
#[must_use]
pub fn rank(
    nodes: &[Node],
    table: &MembershipTable,
    constraints: &PlacementConstraints,
    now_ms: u64,
) -> Ranking {
    let mut ranking = Ranking::default();

    for node in nodes {
        if let Some(region) = constraints.region.as_deref() {
            if node.kind.is_regional() && !node.in_region(region) {
                ranking.excluded.push((node.id, Exclusion::Region));
                continue;
            }
        }
        let capability_match = constraints
            .capability
            .is_some_and(|capability| node.has_capability(capability));
        if constraints.strict && constraints.capability.is_some() && !capability_match {
            ranking.excluded.push((node.id, Exclusion::Capability));
            continue;
        }
        match table.placement_health(node.id, now_ms) {
            PlacementHealth::Usable { status, load } => ranking.candidates.push(Candidate {
                node: node.clone(),
                status,
                load,
                capability_match,
            }),
            PlacementHealth::Unknown => ranking.excluded.push((node.id, Exclusion::Unknown)),
            PlacementHealth::Stale => ranking.excluded.push((node.id, Exclusion::Stale)),
            PlacementHealth::Dead => ranking.excluded.push((node.id, Exclusion::Dead)),
        }
    }

    let prefer_capability = constraints.capability.is_some() && !constraints.strict;
    ranking
        .candidates
        .sort_by(|a, b| compare(a, b, prefer_capability));
    ranking
}

/// Picks nodes for new calls.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    registry: NodeRegistry,
    table: Arc<MembershipTable>,
}

impl LoadBalancer {
    #[must_use]
    pub const fn new(registry: NodeRegistry, table: Arc<MembershipTable>) -> Self {
        Self { registry, table }
    }

    /// Full ranking for `kind` under `constraints`.
    ///
    /// # Errors
    /// Returns [`PlacementError::RegistryUnavailable`] if the registry cannot be read.
    pub async fn rank_nodes(
        &self,
        kind: NodeKind,
        constraints: &PlacementConstraints,
        deadline: Deadline,
    ) -> Result<Ranking, PlacementError> {
        let nodes = self
            .registry
            .list_nodes(kind, constraints.region.as_deref(), deadline)
            .await?;
        Ok(rank(&nodes, &self.table, constraints, self.table.now_ms()))
    }

    /// Best node of `kind` for a new call.
    ///
    /// # Errors
    /// Returns [`PlacementError::NoCandidateAvailable`] when nothing is
    /// eligible, or [`PlacementError::RegistryUnavailable`] if the registry
    /// cannot be read.
    pub async fn select_node(
        &self,
        kind: NodeKind,
        constraints: &PlacementConstraints,
        deadline: Deadline,
    ) -> Result<Node, PlacementError> {
        let ranking = self.rank_nodes(kind, constraints, deadline).await?;
        let Some(best) = ranking.candidates.into_iter().next() else {
            info!(
                %kind,
                region = constraints.region.as_deref(),
                excluded = ranking.excluded.len(),
                "no placement candidate available"
            );
            return Err(PlacementError::NoCandidateAvailable { kind });
        };
        debug!(
            %kind,
            node_id = %best.node.id,
            status = %best.status,
            active_calls = best.load.active_calls,
            cpu_pct = best.load.cpu_pct,
            "selected node"
        );
        Ok(best.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Evidence, GossipConfig, Liveness, MemberUpdate, Version};
    use cp_store::MemoryStore;
    use cp_testkit::{UnavailableStore, media_relay, rtc_media_relay, sip_router};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::time::Duration;

    const OBSERVER: NodeId = NodeId(1_000);

    fn table() -> MembershipTable {
        MembershipTable::new(OBSERVER, 1, None, &GossipConfig::default())
    }

    fn report(table: &MembershipTable, id: u64, calls: u32, cpu: f32) {
        let update = MemberUpdate {
            node_id: NodeId::new(id),
            version: Version {
                incarnation: 1,
                sequence: u64::from(calls) + 1,
            },
            liveness: Liveness::Alive,
            load: LoadMetrics::new(calls, cpu),
            addr: None,
        };
        table.apply_update(&update, Evidence::Direct, 0);
    }

    fn leave(table: &MembershipTable, id: u64) {
        let update = MemberUpdate {
            node_id: NodeId::new(id),
            version: Version {
                incarnation: 1,
                sequence: u64::MAX,
            },
            liveness: Liveness::Left,
            load: LoadMetrics::default(),
            addr: None,
        };
        table.apply_update(&update, Evidence::Direct, 0);
    }

    fn ids(ranking: &Ranking) -> Vec<u64> {
        ranking.candidates.iter().map(|c| c.node.id.get()).collect()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    // ---- ranking ----

    #[test]
    fn call_count_dominates_cpu() {
        let table = table();
        report(&table, 1, 3, 40.0);
        report(&table, 2, 1, 90.0);
        let nodes = [media_relay(1), media_relay(2)];

        let ranking = rank(&nodes, &table, &PlacementConstraints::any(), 0);
        assert_eq!(ids(&ranking), vec![2, 1]);
    }

    #[test]
    fn cpu_then_id_break_ties() {
        let table = table();
        report(&table, 3, 2, 50.0);
        report(&table, 1, 2, 50.0);
        report(&table, 2, 2, 20.0);
        let nodes = [media_relay(1), media_relay(2), media_relay(3)];

        let ranking = rank(&nodes, &table, &PlacementConstraints::any(), 0);
        assert_eq!(ids(&ranking), vec![2, 1, 3]);
    }

    #[test]
    fn preferred_capability_ranks_first() {
        let table = table();
        report(&table, 1, 0, 5.0);
        report(&table, 2, 9, 80.0);
        let nodes = [media_relay(1), rtc_media_relay(2)];

        let preferred = PlacementConstraints::any().prefer(Capability::RtcOptimized);
        assert_eq!(ids(&rank(&nodes, &table, &preferred, 0)), vec![2, 1]);

        let required = PlacementConstraints::any().require(Capability::RtcOptimized);
        let ranking = rank(&nodes, &table, &required, 0);
        assert_eq!(ids(&ranking), vec![2]);
        assert_eq!(
            ranking.excluded,
            vec![(NodeId::new(1), Exclusion::Capability)]
        );
    }

    #[test]
    fn region_applies_to_sip_routers() {
        let table = table();
        report(&table, 1, 0, 0.0);
        report(&table, 2, 0, 0.0);
        let nodes = [sip_router(1, "us-east"), sip_router(2, "eu-west")];

        let ranking = rank(
            &nodes,
            &table,
            &PlacementConstraints::any().in_region("eu-west"),
            0,
        );
        assert_eq!(ids(&ranking), vec![2]);
        assert_eq!(ranking.excluded, vec![(NodeId::new(1), Exclusion::Region)]);
    }

    #[test]
    fn unhealthy_nodes_are_excluded_with_reasons() {
        let table = table();
        report(&table, 1, 0, 0.0);
        leave(&table, 2);
        report(&table, 4, 0, 0.0);
        table.probe_failed(NodeId::new(4), 0);
        let nodes = [media_relay(1), media_relay(2), media_relay(3), media_relay(4)];

        let ranking = rank(&nodes, &table, &PlacementConstraints::any(), 2_500);
        assert_eq!(ids(&ranking), vec![1]);
        assert_eq!(
            ranking.excluded,
            vec![
                (NodeId::new(2), Exclusion::Dead),
                (NodeId::new(3), Exclusion::Unknown),
                (NodeId::new(4), Exclusion::Stale),
            ]
        );
    }

    #[test]
    fn silent_alive_node_is_not_ranked_on_old_load() {
        let table = table();
        report(&table, 1, 0, 0.0);
        report(&table, 2, 9, 90.0);
        let update = MemberUpdate {
            node_id: NodeId::new(2),
            version: Version {
                incarnation: 1,
                sequence: 11,
            },
            liveness: Liveness::Alive,
            load: LoadMetrics::new(9, 90.0),
            addr: None,
        };
        table.apply_update(&update, Evidence::Direct, 6_000);
        let nodes = [media_relay(1), media_relay(2)];

        let ranking = rank(&nodes, &table, &PlacementConstraints::any(), 10_000);
        assert_eq!(ids(&ranking), vec![2]);
        assert_eq!(ranking.excluded, vec![(NodeId::new(1), Exclusion::Stale)]);
    }

    #[test]
    fn fresh_suspect_is_still_a_candidate() {
        let table = table();
        report(&table, 1, 5, 10.0);
        table.probe_failed(NodeId::new(1), 0);
        let ranking = rank(&[media_relay(1)], &table, &PlacementConstraints::any(), 100);
        assert_eq!(ranking.best().map(|c| c.status), Some(MemberStatus::Suspect));
    }

    proptest! {
        #[test]
        fn dead_nodes_are_never_candidates(
            fleet in proptest::collection::vec((0u32..20, 0.0f32..100.0, any::<bool>()), 1..12)
        ) {
            let table = table();
            let mut nodes = Vec::new();
            for (index, (calls, cpu, dead)) in fleet.iter().enumerate() {
                let id = index as u64 + 1;
                nodes.push(media_relay(id));
                report(&table, id, *calls, *cpu);
                if *dead {
                    leave(&table, id);
                }
            }

            let ranking = rank(&nodes, &table, &PlacementConstraints::any(), 0);
            for candidate in &ranking.candidates {
                prop_assert_ne!(table.status(candidate.node.id), MemberStatus::Dead);
            }
            let dead = fleet.iter().filter(|(_, _, dead)| *dead).count();
            prop_assert_eq!(ranking.candidates.len(), fleet.len() - dead);
        }
    }

    // ---- selection ----

    fn balancer(store: MemoryStore, table: MembershipTable) -> LoadBalancer {
        LoadBalancer::new(NodeRegistry::new(Arc::new(store)), Arc::new(table))
    }

    #[tokio::test]
    async fn selects_least_loaded_alive_node() {
        let store = MemoryStore::new();
        store.upsert_node(media_relay(1));
        store.upsert_node(media_relay(2));
        let table = table();
        report(&table, 1, 3, 40.0);
        report(&table, 2, 1, 90.0);

        let node = balancer(store, table)
            .select_node(NodeKind::MediaRelay, &PlacementConstraints::any(), deadline())
            .await
            .expect("selected");
        assert_eq!(node.id, NodeId::new(2));
    }

    #[tokio::test]
    async fn all_dead_is_no_candidate() {
        let store = MemoryStore::new();
        store.upsert_node(media_relay(1));
        store.upsert_node(media_relay(2));
        let table = table();
        leave(&table, 1);
        leave(&table, 2);

        let err = balancer(store, table)
            .select_node(NodeKind::MediaRelay, &PlacementConstraints::any(), deadline())
            .await
            .expect_err("no candidate");
        assert_eq!(
            err,
            PlacementError::NoCandidateAvailable {
                kind: NodeKind::MediaRelay
            }
        );
    }

    #[tokio::test]
    async fn registry_failure_is_reported() {
        let balancer = LoadBalancer::new(NodeRegistry::new(Arc::new(UnavailableStore)), Arc::new(table()));
        let err = balancer
            .select_node(NodeKind::SipRouter, &PlacementConstraints::any(), deadline())
            .await
            .expect_err("unavailable");
        assert!(matches!(err, PlacementError::RegistryUnavailable(_)));
    }
}
