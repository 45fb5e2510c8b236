//! Observer-local membership table.
//!
//! Each node keeps its own view of every peer:
//!
//! ```text
//! unknown ──contact──▶ alive ──no evidence / probe failed──▶ suspect ──timeout──▶ dead ──retention──▶ (reaped)
//!                        ▲                                      │                    │
//!                        └──────────── newer evidence ──────────┘                    │
//!                        ▲                                                           │
//!                        └─────────── direct contact or higher incarnation ──────────┘
//! ```
//!
//! Updates are ordered by [`Version`] `(incarnation, sequence)`. An update is
//! applied only when strictly newer than the stored version, so duplicated,
//! reordered or replayed messages never change state.
//!
//! Locking: the outer map lock is taken for write only to insert or reap a
//! member; per-member state has its own lock.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use cp_core::{LoadMetrics, NodeId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::GossipConfig;

/// Capacity of the membership event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Versions and updates
// ─────────────────────────────────────────────────────────────────────────────

/// Version of a member's self-reported state.
///
/// `incarnation` identifies a process lifetime and `sequence` counts state
/// changes within it; ordering is lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub incarnation: u64,
    pub sequence: u64,
}

impl Version {
    /// First version of a new incarnation.
    #[must_use]
    pub const fn first(incarnation: u64) -> Self {
        Self {
            incarnation,
            sequence: 1,
        }
    }

    #[must_use]
    const fn next(self) -> Self {
        Self {
            incarnation: self.incarnation,
            sequence: self.sequence.saturating_add(1),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.incarnation, self.sequence)
    }
}

/// Liveness a member reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    /// Graceful departure.
    Left,
}

/// A member's self-reported state, as disseminated by gossip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberUpdate {
    pub node_id: NodeId,
    pub version: Version,
    pub liveness: Liveness,
    pub load: LoadMetrics,
    /// Gossip address of the member.
    #[serde(default)]
    pub addr: Option<SocketAddr>,
}

/// How an update reached this observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// Sent by the member itself.
    Direct,
    /// Relayed by a third party.
    Gossip,
}

/// Result of applying an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update changed the member's state.
    Applied,
    /// Same version heard directly from the member; only freshness changed.
    Refreshed,
    /// Older, equal, or otherwise not acceptable; nothing changed.
    Stale,
}

// ─────────────────────────────────────────────────────────────────────────────
// Member state
// ─────────────────────────────────────────────────────────────────────────────

/// Observer-local status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Unknown,
    Alive,
    Suspect,
    Dead,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Alive => write!(f, "alive"),
            Self::Suspect => write!(f, "suspect"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

#[derive(Debug, Clone)]
struct MemberState {
    status: MemberStatus,
    version: Option<Version>,
    liveness: Liveness,
    load: Option<LoadMetrics>,
    last_known_load: Option<LoadMetrics>,
    addr: Option<SocketAddr>,
    last_heard_ms: u64,
    status_since_ms: u64,
    transmits: u32,
}

impl MemberState {
    const fn unknown(addr: Option<SocketAddr>, now_ms: u64) -> Self {
        Self {
            status: MemberStatus::Unknown,
            version: None,
            liveness: Liveness::Alive,
            load: None,
            last_known_load: None,
            addr,
            last_heard_ms: now_ms,
            status_since_ms: now_ms,
            transmits: 0,
        }
    }

    fn discard_load(&mut self) {
        if let Some(load) = self.load.take() {
            self.last_known_load = Some(load);
        }
    }

    fn as_update(&self, node_id: NodeId) -> Option<MemberUpdate> {
        let version = self.version?;
        Some(MemberUpdate {
            node_id,
            version,
            liveness: self.liveness,
            load: self
                .load
                .or(self.last_known_load)
                .unwrap_or_default(),
            addr: self.addr,
        })
    }
}

/// Point-in-time view of one member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSnapshot {
    pub node_id: NodeId,
    pub status: MemberStatus,
    pub version: Option<Version>,
    /// Load trusted for placement.
    pub load: Option<LoadMetrics>,
    /// Load last seen before the member died, kept for observability.
    pub last_known_load: Option<LoadMetrics>,
    pub addr: Option<SocketAddr>,
    pub last_heard_ms: u64,
    pub is_local: bool,
}

/// Membership transitions, published for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MembershipEvent {
    Joined { node_id: NodeId },
    Rejoined { node_id: NodeId, incarnation: u64 },
    Suspected { node_id: NodeId },
    Recovered { node_id: NodeId },
    Failed { node_id: NodeId },
    Left { node_id: NodeId },
    Reaped { node_id: NodeId },
}

impl MembershipEvent {
    /// The member the event is about.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        match self {
            Self::Joined { node_id }
            | Self::Rejoined { node_id, .. }
            | Self::Suspected { node_id }
            | Self::Recovered { node_id }
            | Self::Failed { node_id }
            | Self::Left { node_id }
            | Self::Reaped { node_id } => *node_id,
        }
    }
}

/// Whether a member may be used for placement right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlacementHealth {
    /// Alive, or suspect within the staleness window.
    Usable {
        status: MemberStatus,
        load: LoadMetrics,
    },
    /// Never contacted, or not in the table.
    Unknown,
    /// Suspect for longer than the staleness window.
    Stale,
    Dead,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    suspect_after_ms: u64,
    suspicion_timeout_ms: u64,
    staleness_window_ms: u64,
    dead_retention_ms: u64,
}

impl From<&GossipConfig> for Timing {
    fn from(config: &GossipConfig) -> Self {
        Self {
            suspect_after_ms: config.suspect_after_ms,
            suspicion_timeout_ms: config.suspicion_timeout_ms,
            staleness_window_ms: config.staleness_window_ms,
            dead_retention_ms: config.dead_retention_ms,
        }
    }
}

#[derive(Debug, Clone)]
struct LocalMember {
    node_id: NodeId,
    version: Version,
    liveness: Liveness,
    load: LoadMetrics,
    addr: Option<SocketAddr>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// Membership view held by one node.
#[derive(Debug)]
pub struct MembershipTable {
    local: RwLock<LocalMember>,
    members: RwLock<HashMap<NodeId, Arc<RwLock<MemberState>>>>,
    timing: Timing,
    epoch: Instant,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipTable {
    /// Create a table for `local_id`, starting at [`Version::first`]`(incarnation)`.
    ///
    /// `addr` is the gossip address advertised to peers.
    #[must_use]
    pub fn new(
        local_id: NodeId,
        incarnation: u64,
        addr: Option<SocketAddr>,
        config: &GossipConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local: RwLock::new(LocalMember {
                node_id: local_id,
                version: Version::first(incarnation),
                liveness: Liveness::Alive,
                load: LoadMetrics::default(),
                addr,
            }),
            members: RwLock::new(HashMap::new()),
            timing: Timing::from(config),
            epoch: Instant::now(),
            events,
        }
    }

    /// Milliseconds since the table was created (monotonic).
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local.read().node_id
    }

    /// Subscribe to membership transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Number of remote members (any status).
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    // ---- local member ----

    /// The local node's current self-report.
    #[must_use]
    pub fn local_update(&self) -> MemberUpdate {
        let local = self.local.read();
        MemberUpdate {
            node_id: local.node_id,
            version: local.version,
            liveness: local.liveness,
            load: local.load,
            addr: local.addr,
        }
    }

    /// Record new local load and bump the local sequence.
    pub fn set_local_load(&self, load: LoadMetrics) -> Version {
        let mut local = self.local.write();
        local.load = load;
        local.version = local.version.next();
        local.version
    }

    /// Bump the local sequence so peers see fresh evidence of life.
    pub fn bump_local_heartbeat(&self) -> Version {
        let mut local = self.local.write();
        local.version = local.version.next();
        local.version
    }

    /// Mark the local node as leaving and return the announcement.
    pub fn leave(&self) -> MemberUpdate {
        {
            let mut local = self.local.write();
            local.liveness = Liveness::Left;
            local.version = local.version.next();
        }
        self.local_update()
    }

    // ---- remote members ----

    /// Add `node_id` as an unknown member if absent. Returns whether it was added.
    pub fn ensure_member(&self, node_id: NodeId, addr: SocketAddr) -> bool {
        if node_id == self.local_id() {
            return false;
        }
        if let Some(entry) = self.members.read().get(&node_id) {
            let mut state = entry.write();
            if state.addr.is_none() {
                state.addr = Some(addr);
            }
            return false;
        }
        let now = self.now_ms();
        let mut members = self.members.write();
        if members.contains_key(&node_id) {
            return false;
        }
        members.insert(
            node_id,
            Arc::new(RwLock::new(MemberState::unknown(Some(addr), now))),
        );
        debug!(node_id = %node_id, %addr, "added gossip peer");
        true
    }

    fn entry_or_insert(
        &self,
        node_id: NodeId,
        addr: Option<SocketAddr>,
        now_ms: u64,
    ) -> Arc<RwLock<MemberState>> {
        if let Some(entry) = self.members.read().get(&node_id) {
            return Arc::clone(entry);
        }
        let mut members = self.members.write();
        Arc::clone(
            members
                .entry(node_id)
                .or_insert_with(|| Arc::new(RwLock::new(MemberState::unknown(addr, now_ms)))),
        )
    }

    /// Apply a member update observed at `now_ms`.
    ///
    /// Updates about the local node are ignored. A dead member is revived
    /// only by direct contact or by a higher incarnation; a member that left
    /// is revived only by a higher incarnation.
    pub fn apply_update(
        &self,
        update: &MemberUpdate,
        evidence: Evidence,
        now_ms: u64,
    ) -> UpdateOutcome {
        let node_id = update.node_id;
        if node_id == self.local_id() {
            return UpdateOutcome::Stale;
        }

        let entry = self.entry_or_insert(node_id, update.addr, now_ms);
        let mut state = entry.write();

        let newer = state.version.is_none_or(|current| update.version > current);
        if !newer {
            let same_version = state.version == Some(update.version);
            if same_version && evidence == Evidence::Direct && state.status == MemberStatus::Alive {
                state.last_heard_ms = now_ms;
                return UpdateOutcome::Refreshed;
            }
            return UpdateOutcome::Stale;
        }

        if state.status == MemberStatus::Dead && update.liveness == Liveness::Alive {
            let reincarnated = state
                .version
                .is_none_or(|current| update.version.incarnation > current.incarnation);
            let contacted = evidence == Evidence::Direct && state.liveness != Liveness::Left;
            if !reincarnated && !contacted {
                return UpdateOutcome::Stale;
            }
        }

        let previous = state.status;
        state.version = Some(update.version);
        state.liveness = update.liveness;
        state.transmits = 0;
        if update.addr.is_some() {
            state.addr = update.addr;
        }

        let event = match update.liveness {
            Liveness::Left => {
                state.discard_load();
                state.status = MemberStatus::Dead;
                if previous == MemberStatus::Dead {
                    None
                } else {
                    state.status_since_ms = now_ms;
                    Some(MembershipEvent::Left { node_id })
                }
            }
            Liveness::Alive => {
                if previous == MemberStatus::Dead {
                    state.last_known_load = None;
                }
                state.load = Some(update.load);
                state.last_heard_ms = now_ms;
                state.status = MemberStatus::Alive;
                if previous != MemberStatus::Alive {
                    state.status_since_ms = now_ms;
                }
                match previous {
                    MemberStatus::Unknown => Some(MembershipEvent::Joined { node_id }),
                    MemberStatus::Dead => Some(MembershipEvent::Rejoined {
                        node_id,
                        incarnation: update.version.incarnation,
                    }),
                    MemberStatus::Suspect => Some(MembershipEvent::Recovered { node_id }),
                    MemberStatus::Alive => None,
                }
            }
        };
        drop(state);

        if let Some(event) = event {
            self.publish(event);
        }
        UpdateOutcome::Applied
    }

    /// Record a failed probe round (direct and indirect) for `node_id`.
    ///
    /// Returns whether the member moved to suspect.
    pub fn probe_failed(&self, node_id: NodeId, now_ms: u64) -> bool {
        let Some(entry) = self.members.read().get(&node_id).cloned() else {
            return false;
        };
        let mut state = entry.write();
        if state.status != MemberStatus::Alive {
            return false;
        }
        state.status = MemberStatus::Suspect;
        state.status_since_ms = now_ms;
        drop(state);
        self.publish(MembershipEvent::Suspected { node_id });
        true
    }

    /// Advance timers: suspect silent members, fail expired suspects, reap
    /// long-dead members. Returns the transitions that happened.
    pub fn tick(&self, now_ms: u64) -> Vec<MembershipEvent> {
        let timing = self.timing;
        let entries: Vec<(NodeId, Arc<RwLock<MemberState>>)> = self
            .members
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let mut events = Vec::new();
        let mut expired = Vec::new();
        for (node_id, entry) in entries {
            let mut state = entry.write();
            match state.status {
                MemberStatus::Alive
                    if now_ms.saturating_sub(state.last_heard_ms) > timing.suspect_after_ms =>
                {
                    state.status = MemberStatus::Suspect;
                    state.status_since_ms = now_ms;
                    events.push(MembershipEvent::Suspected { node_id });
                }
                MemberStatus::Suspect
                    if now_ms.saturating_sub(state.status_since_ms)
                        >= timing.suspicion_timeout_ms =>
                {
                    state.status = MemberStatus::Dead;
                    state.status_since_ms = now_ms;
                    state.discard_load();
                    events.push(MembershipEvent::Failed { node_id });
                }
                MemberStatus::Dead
                    if now_ms.saturating_sub(state.status_since_ms)
                        >= timing.dead_retention_ms =>
                {
                    expired.push(node_id);
                }
                _ => {}
            }
        }

        if !expired.is_empty() {
            let mut members = self.members.write();
            for node_id in expired {
                let still_expired = members.get(&node_id).is_some_and(|entry| {
                    let state = entry.read();
                    state.status == MemberStatus::Dead
                        && now_ms.saturating_sub(state.status_since_ms) >= timing.dead_retention_ms
                });
                if still_expired {
                    members.remove(&node_id);
                    events.push(MembershipEvent::Reaped { node_id });
                }
            }
        }

        for event in &events {
            self.publish(*event);
        }
        events
    }

    fn publish(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Suspected { .. } | MembershipEvent::Reaped { .. } => {
                debug!(node_id = %event.node_id(), ?event, "membership transition");
            }
            _ => info!(node_id = %event.node_id(), ?event, "membership transition"),
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ---- reads ----

    /// Observer-local status of `node_id`. The local node is always alive
    /// until it leaves.
    #[must_use]
    pub fn status(&self, node_id: NodeId) -> MemberStatus {
        {
            let local = self.local.read();
            if local.node_id == node_id {
                return match local.liveness {
                    Liveness::Alive => MemberStatus::Alive,
                    Liveness::Left => MemberStatus::Dead,
                };
            }
        }
        self.members
            .read()
            .get(&node_id)
            .map_or(MemberStatus::Unknown, |entry| entry.read().status)
    }

    /// Whether `node_id` may be used for placement at `now_ms`, and with what load.
    ///
    /// Load is only trusted while it is fresh: a suspect member within
    /// `staleness_window_ms` of last contact, an alive member within
    /// `suspect_after_ms + staleness_window_ms`. The alive bound holds even
    /// when nothing calls [`Self::tick`].
    #[must_use]
    pub fn placement_health(&self, node_id: NodeId, now_ms: u64) -> PlacementHealth {
        {
            let local = self.local.read();
            if local.node_id == node_id {
                return match local.liveness {
                    Liveness::Alive => PlacementHealth::Usable {
                        status: MemberStatus::Alive,
                        load: local.load,
                    },
                    Liveness::Left => PlacementHealth::Dead,
                };
            }
        }
        let Some(entry) = self.members.read().get(&node_id).cloned() else {
            return PlacementHealth::Unknown;
        };
        let state = entry.read();
        let load = state.load.unwrap_or_default();
        match state.status {
            MemberStatus::Unknown => PlacementHealth::Unknown,
            MemberStatus::Dead => PlacementHealth::Dead,
            MemberStatus::Alive => {
                let limit = self
                    .timing
                    .suspect_after_ms
                    .saturating_add(self.timing.staleness_window_ms);
                if now_ms.saturating_sub(state.last_heard_ms) <= limit {
                    PlacementHealth::Usable {
                        status: MemberStatus::Alive,
                        load,
                    }
                } else {
                    PlacementHealth::Stale
                }
            }
            MemberStatus::Suspect => {
                if now_ms.saturating_sub(state.last_heard_ms) <= self.timing.staleness_window_ms {
                    PlacementHealth::Usable {
                        status: MemberStatus::Suspect,
                        load,
                    }
                } else {
                    PlacementHealth::Stale
                }
            }
        }
    }

    /// Members worth probing: not dead and with a known address.
    #[must_use]
    pub fn probe_targets(&self) -> Vec<(NodeId, SocketAddr)> {
        self.members_where(|state| state.status != MemberStatus::Dead)
    }

    /// Alive members that can run indirect probes, excluding `target`.
    #[must_use]
    pub fn indirect_helpers(&self, target: NodeId) -> Vec<(NodeId, SocketAddr)> {
        self.members_where(|state| state.status == MemberStatus::Alive)
            .into_iter()
            .filter(|(id, _)| *id != target)
            .collect()
    }

    /// Gossip address of `node_id` if it is still worth probing.
    #[must_use]
    pub fn probe_addr(&self, node_id: NodeId) -> Option<SocketAddr> {
        let entry = self.members.read().get(&node_id).cloned()?;
        let state = entry.read();
        if state.status == MemberStatus::Dead {
            None
        } else {
            state.addr
        }
    }

    fn members_where(&self, keep: impl Fn(&MemberState) -> bool) -> Vec<(NodeId, SocketAddr)> {
        let mut out: Vec<(NodeId, SocketAddr)> = self
            .members
            .read()
            .iter()
            .filter_map(|(id, entry)| {
                let state = entry.read();
                if keep(&state) {
                    state.addr.map(|addr| (*id, addr))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Updates to piggyback on the next message, at most `limit` including
    /// the local self-report, which always comes first.
    ///
    /// Members are picked least-transmitted first so every change keeps
    /// circulating; silently failed members are not re-announced.
    pub fn updates_for_gossip(&self, limit: usize) -> Vec<MemberUpdate> {
        let mut out = Vec::with_capacity(limit.max(1));
        out.push(self.local_update());
        if limit <= 1 {
            return out;
        }

        let mut candidates: Vec<(u32, NodeId, Arc<RwLock<MemberState>>)> = self
            .members
            .read()
            .iter()
            .filter_map(|(id, entry)| {
                let state = entry.read();
                let eligible = state.version.is_some()
                    && match state.status {
                        MemberStatus::Unknown => false,
                        MemberStatus::Dead => state.liveness == Liveness::Left,
                        MemberStatus::Alive | MemberStatus::Suspect => true,
                    };
                eligible.then(|| (state.transmits, *id, Arc::clone(entry)))
            })
            .collect();
        candidates.sort_by_key(|(transmits, id, _)| (*transmits, *id));

        for (_, node_id, entry) in candidates.into_iter().take(limit - 1) {
            let mut state = entry.write();
            if let Some(update) = state.as_update(node_id) {
                state.transmits = state.transmits.saturating_add(1);
                out.push(update);
            }
        }
        out
    }

    /// Full table, local node first then remote members by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MemberSnapshot> {
        let local = self.local.read().clone();
        let mut remote: Vec<MemberSnapshot> = self
            .members
            .read()
            .iter()
            .map(|(id, entry)| {
                let state = entry.read();
                MemberSnapshot {
                    node_id: *id,
                    status: state.status,
                    version: state.version,
                    load: state.load,
                    last_known_load: state.last_known_load,
                    addr: state.addr,
                    last_heard_ms: state.last_heard_ms,
                    is_local: false,
                }
            })
            .collect();
        remote.sort_by_key(|member| member.node_id);

        let mut out = Vec::with_capacity(remote.len() + 1);
        out.push(MemberSnapshot {
            node_id: local.node_id,
            status: match local.liveness {
                Liveness::Alive => MemberStatus::Alive,
                Liveness::Left => MemberStatus::Dead,
            },
            version: Some(local.version),
            load: Some(local.load),
            last_known_load: None,
            addr: local.addr,
            last_heard_ms: self.now_ms(),
            is_local: true,
        });
        out.extend(remote);
        out
    }

    /// Snapshot of one remote member.
    #[must_use]
    pub fn member(&self, node_id: NodeId) -> Option<MemberSnapshot> {
        self.snapshot()
            .into_iter()
            .find(|member| member.node_id == node_id && !member.is_local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const LOCAL: NodeId = NodeId(100);

    fn config() -> GossipConfig {
        GossipConfig::default()
            .with_probe(1_000, 300)
            .with_suspicion(5_000, 5_000)
            .with_staleness_window(2_000)
            .with_dead_retention(60_000)
    }

    fn table() -> MembershipTable {
        MembershipTable::new(LOCAL, 1, None, &config())
    }

    fn update(id: u64, incarnation: u64, sequence: u64, calls: u32) -> MemberUpdate {
        MemberUpdate {
            node_id: NodeId::new(id),
            version: Version {
                incarnation,
                sequence,
            },
            liveness: Liveness::Alive,
            load: LoadMetrics::new(calls, 10.0),
            addr: None,
        }
    }

    fn left(id: u64, incarnation: u64, sequence: u64) -> MemberUpdate {
        MemberUpdate {
            liveness: Liveness::Left,
            ..update(id, incarnation, sequence, 0)
        }
    }

    // ---- transitions ----

    #[test]
    fn first_contact_makes_member_alive() {
        let table = table();
        let outcome = table.apply_update(&update(1, 1, 1, 3), Evidence::Gossip, 0);
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(table.status(NodeId::new(1)), MemberStatus::Alive);
    }

    #[test]
    fn stale_and_equal_versions_are_ignored() {
        let table = table();
        table.apply_update(&update(1, 1, 5, 3), Evidence::Gossip, 0);

        assert_eq!(
            table.apply_update(&update(1, 1, 4, 9), Evidence::Gossip, 10),
            UpdateOutcome::Stale
        );
        assert_eq!(
            table.apply_update(&update(1, 1, 5, 9), Evidence::Gossip, 10),
            UpdateOutcome::Stale
        );
        let member = table.member(NodeId::new(1)).expect("member");
        assert_eq!(member.load.map(|l| l.active_calls), Some(3));
        assert_eq!(member.last_heard_ms, 0);
    }

    #[test]
    fn equal_version_direct_contact_refreshes_freshness_only() {
        let table = table();
        table.apply_update(&update(1, 1, 5, 3), Evidence::Gossip, 0);
        assert_eq!(
            table.apply_update(&update(1, 1, 5, 9), Evidence::Direct, 700),
            UpdateOutcome::Refreshed
        );
        let member = table.member(NodeId::new(1)).expect("member");
        assert_eq!(member.last_heard_ms, 700);
        assert_eq!(member.load.map(|l| l.active_calls), Some(3));
    }

    #[test]
    fn silent_member_is_suspected_then_failed() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&update(1, 1, 1, 3), Evidence::Gossip, 0);

        assert!(table.tick(5_000).is_empty());
        assert_eq!(
            table.tick(5_001),
            vec![MembershipEvent::Suspected { node_id: id }]
        );
        assert_eq!(table.status(id), MemberStatus::Suspect);

        assert_eq!(
            table.tick(10_001),
            vec![MembershipEvent::Failed { node_id: id }]
        );
        let member = table.member(id).expect("member");
        assert_eq!(member.status, MemberStatus::Dead);
        assert_eq!(member.load, None);
        assert_eq!(member.last_known_load.map(|l| l.active_calls), Some(3));
    }

    #[test]
    fn newer_evidence_recovers_suspect() {
        let table = table();
        let id = NodeId::new(1);
        let mut events = table.subscribe();
        table.apply_update(&update(1, 1, 1, 3), Evidence::Gossip, 0);
        assert!(table.probe_failed(id, 100));
        table.apply_update(&update(1, 1, 2, 4), Evidence::Gossip, 200);

        assert_eq!(table.status(id), MemberStatus::Alive);
        assert_eq!(
            events.try_recv().ok(),
            Some(MembershipEvent::Joined { node_id: id })
        );
        assert_eq!(
            events.try_recv().ok(),
            Some(MembershipEvent::Suspected { node_id: id })
        );
        assert_eq!(
            events.try_recv().ok(),
            Some(MembershipEvent::Recovered { node_id: id })
        );
    }

    #[test]
    fn dead_member_needs_direct_contact_or_new_incarnation() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&update(1, 1, 1, 3), Evidence::Gossip, 0);
        table.probe_failed(id, 0);
        table.tick(5_000);
        assert_eq!(table.status(id), MemberStatus::Dead);

        // Relayed heartbeat from the previous life does not revive it.
        assert_eq!(
            table.apply_update(&update(1, 1, 2, 3), Evidence::Gossip, 5_100),
            UpdateOutcome::Stale
        );
        assert_eq!(table.status(id), MemberStatus::Dead);

        // Direct contact does, with fresh load only.
        table.apply_update(&update(1, 1, 3, 0), Evidence::Direct, 5_200);
        let member = table.member(id).expect("member");
        assert_eq!(member.status, MemberStatus::Alive);
        assert_eq!(member.load.map(|l| l.active_calls), Some(0));
        assert_eq!(member.last_known_load, None);
    }

    #[test]
    fn left_member_is_dead_until_reincarnated() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&update(1, 1, 1, 3), Evidence::Gossip, 0);
        table.apply_update(&left(1, 1, 2), Evidence::Direct, 10);
        assert_eq!(table.status(id), MemberStatus::Dead);

        assert_eq!(
            table.apply_update(&update(1, 1, 3, 0), Evidence::Direct, 20),
            UpdateOutcome::Stale
        );
        assert_eq!(
            table.apply_update(&update(1, 2, 1, 0), Evidence::Gossip, 30),
            UpdateOutcome::Applied
        );
        assert_eq!(table.status(id), MemberStatus::Alive);
    }

    #[test]
    fn dead_members_are_reaped_after_retention() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&left(1, 1, 1), Evidence::Gossip, 0);
        assert!(table.tick(59_999).is_empty());
        assert_eq!(
            table.tick(60_000),
            vec![MembershipEvent::Reaped { node_id: id }]
        );
        assert!(table.is_empty());
    }

    #[test]
    fn updates_about_local_node_are_ignored() {
        let table = table();
        let outcome = table.apply_update(&left(100, 9, 9), Evidence::Gossip, 0);
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(table.status(LOCAL), MemberStatus::Alive);
    }

    // ---- placement view ----

    #[test]
    fn suspect_is_usable_only_within_staleness_window() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&update(1, 1, 1, 3), Evidence::Gossip, 0);
        table.probe_failed(id, 500);

        assert!(matches!(
            table.placement_health(id, 2_000),
            PlacementHealth::Usable {
                status: MemberStatus::Suspect,
                ..
            }
        ));
        assert_eq!(table.placement_health(id, 2_001), PlacementHealth::Stale);
        assert_eq!(
            table.placement_health(NodeId::new(2), 0),
            PlacementHealth::Unknown
        );
    }

    #[test]
    fn alive_member_goes_stale_without_ticks() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&update(1, 1, 1, 0), Evidence::Direct, 0);

        assert!(matches!(
            table.placement_health(id, 4_900),
            PlacementHealth::Usable {
                status: MemberStatus::Alive,
                ..
            }
        ));
        assert!(matches!(
            table.placement_health(id, 7_000),
            PlacementHealth::Usable { .. }
        ));
        assert_eq!(table.placement_health(id, 7_001), PlacementHealth::Stale);
        assert_eq!(table.placement_health(id, 3_600_000), PlacementHealth::Stale);
        assert_eq!(table.status(id), MemberStatus::Alive);
    }

    #[test]
    fn fresh_contact_makes_stale_alive_member_usable_again() {
        let table = table();
        let id = NodeId::new(1);
        table.apply_update(&update(1, 1, 1, 0), Evidence::Direct, 0);
        assert_eq!(table.placement_health(id, 60_000), PlacementHealth::Stale);

        table.apply_update(&update(1, 1, 2, 4), Evidence::Direct, 60_000);
        assert_eq!(
            table.placement_health(id, 60_000),
            PlacementHealth::Usable {
                status: MemberStatus::Alive,
                load: LoadMetrics::new(4, 10.0),
            }
        );
    }

    #[test]
    fn local_node_reports_its_own_load() {
        let table = table();
        table.set_local_load(LoadMetrics::new(7, 30.0));
        assert_eq!(
            table.placement_health(LOCAL, 0),
            PlacementHealth::Usable {
                status: MemberStatus::Alive,
                load: LoadMetrics::new(7, 30.0),
            }
        );
        table.leave();
        assert_eq!(table.placement_health(LOCAL, 0), PlacementHealth::Dead);
    }

    // ---- dissemination ----

    #[test]
    fn piggyback_starts_with_self_and_rotates() {
        let table = table();
        for id in 1..=3 {
            table.apply_update(&update(id, 1, 1, 0), Evidence::Gossip, 0);
        }
        let first = table.updates_for_gossip(3);
        let ids: Vec<u64> = first.iter().map(|u| u.node_id.get()).collect();
        assert_eq!(ids, vec![100, 1, 2]);

        let second = table.updates_for_gossip(3);
        let ids: Vec<u64> = second.iter().map(|u| u.node_id.get()).collect();
        assert_eq!(ids, vec![100, 3, 1]);
    }

    #[test]
    fn local_changes_bump_sequence() {
        let table = table();
        let before = table.local_update().version;
        let after = table.set_local_load(LoadMetrics::new(1, 1.0));
        assert!(after > before);
        assert!(table.bump_local_heartbeat() > after);
        assert_eq!(table.leave().liveness, Liveness::Left);
    }

    #[test]
    fn ensure_member_adds_unknown_peer_once() {
        let table = table();
        let addr: SocketAddr = "10.0.0.1:7946".parse().expect("addr");
        assert!(table.ensure_member(NodeId::new(1), addr));
        assert!(!table.ensure_member(NodeId::new(1), addr));
        assert!(!table.ensure_member(LOCAL, addr));
        assert_eq!(table.status(NodeId::new(1)), MemberStatus::Unknown);
        assert_eq!(table.probe_targets(), vec![(NodeId::new(1), addr)]);
    }

    // ---- idempotence ----

    fn arb_update() -> impl Strategy<Value = MemberUpdate> {
        (1u64..4, 1u64..3, 1u64..6, any::<bool>(), 0u32..10).prop_map(
            |(id, incarnation, sequence, leaving, calls)| MemberUpdate {
                liveness: if leaving {
                    Liveness::Left
                } else {
                    Liveness::Alive
                },
                ..update(id, incarnation, sequence, calls)
            },
        )
    }

    fn comparable(table: &MembershipTable) -> Vec<(NodeId, MemberStatus, Option<Version>, Option<u32>)> {
        table
            .snapshot()
            .into_iter()
            .filter(|member| !member.is_local)
            .map(|m| (m.node_id, m.status, m.version, m.load.map(|l| l.active_calls)))
            .collect()
    }

    proptest! {
        #[test]
        fn redelivery_never_changes_state(
            updates in proptest::collection::vec(arb_update(), 1..30),
            replay_order in proptest::collection::vec(any::<prop::sample::Index>(), 1..30),
        ) {
            let table = table();
            for update in &updates {
                table.apply_update(update, Evidence::Gossip, 0);
            }
            let before = comparable(&table);

            for index in replay_order {
                let update = index.get(&updates);
                prop_assert_eq!(
                    table.apply_update(update, Evidence::Gossip, 0),
                    UpdateOutcome::Stale
                );
            }
            prop_assert_eq!(comparable(&table), before);
        }
    }
}
