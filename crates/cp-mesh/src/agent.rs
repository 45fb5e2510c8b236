//! Gossip agent: the always-on probe and dissemination loop.
//!
//! Each probe interval the agent bumps its own heartbeat, advances the
//! membership timers and pings the next member in a shuffled round-robin.
//! If no ack arrives within the probe timeout, up to `indirect_probes`
//! alive members are asked to ping the target on its behalf; if none of them
//! relays an ack before the end of the round, the target is suspected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cp_core::{Deadline, LoadMetrics, NodeId};
use cp_registry::NodeRegistry;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::MAX_DATAGRAM_BYTES;
use crate::{
    Evidence, GossipConfig, GossipError, GossipMessage, GossipTransport, MembershipEvent,
    MembershipTable, MemberUpdate, Version,
};

/// Receive buffer size; larger than anything we send.
const RECV_BUFFER_BYTES: usize = 64 * 1024;

/// Incarnation derived from the wall clock, in milliseconds since the epoch.
///
/// Strictly increases across restarts of the same node as long as the clock
/// does not run backwards.
#[must_use]
pub fn wall_clock_incarnation() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
enum ProbeStage {
    /// Waiting for the target's own ack.
    Direct,
    /// Waiting for a helper to relay an ack.
    Indirect,
    /// We are the helper; relay the ack to `requester`.
    Forward {
        requester: SocketAddr,
        requester_probe_id: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingProbe {
    target: NodeId,
    stage: ProbeStage,
    started: Instant,
    deadline: Instant,
}

/// Gossip agent for one node.
pub struct GossipAgent {
    config: GossipConfig,
    table: Arc<MembershipTable>,
    transport: Arc<dyn GossipTransport>,
    registry: Option<(NodeRegistry, u16)>,
    pending: HashMap<u64, PendingProbe>,
    probe_order: Vec<NodeId>,
    next_probe_id: u64,
    rng: StdRng,
}

impl std::fmt::Debug for GossipAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipAgent")
            .field("local_id", &self.table.local_id())
            .field("local_addr", &self.transport.local_addr())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl GossipAgent {
    /// Create an agent driving `table` over `transport`.
    #[must_use]
    pub fn new(
        table: Arc<MembershipTable>,
        transport: Arc<dyn GossipTransport>,
        config: GossipConfig,
    ) -> Self {
        Self {
            config,
            table,
            transport,
            registry: None,
            pending: HashMap::new(),
            probe_order: Vec::new(),
            next_probe_id: 1,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed and periodically refresh peers from `registry`. Peers are
    /// reached at their private address on `gossip_port`.
    #[must_use]
    pub fn with_registry(mut self, registry: NodeRegistry, gossip_port: u16) -> Self {
        self.registry = Some((registry, gossip_port));
        self
    }

    /// Use a fixed RNG seed for probe order and helper choice.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Start the agent on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> AgentHandle {
        let table = Arc::clone(&self.table);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        AgentHandle {
            table,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let transport = Arc::clone(&self.transport);
        info!(
            node_id = %self.table.local_id(),
            addr = %transport.local_addr(),
            "gossip agent started"
        );

        self.refresh_peers().await;

        let mut probe_ticker = tokio::time::interval(self.config.probe_interval());
        probe_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let refresh = self.config.registry_refresh();
        let mut refresh_ticker = tokio::time::interval_at(Instant::now() + refresh, refresh);
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; RECV_BUFFER_BYTES];

        loop {
            let next_deadline = self.next_deadline();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = probe_ticker.tick() => self.probe_round().await,
                _ = refresh_ticker.tick() => self.refresh_peers().await,
                () = tokio::time::sleep_until(next_deadline) => self.expire_probes().await,
                received = transport.recv_from(&mut buf) => match received {
                    Ok((len, src)) => self.handle_datagram(&buf[..len], src).await,
                    Err(GossipError::Closed) => {
                        warn!(node_id = %self.table.local_id(), "gossip transport closed");
                        break;
                    }
                    Err(err) => debug!(error = %err, "gossip receive failed"),
                },
            }
        }

        self.announce_leave().await;
        info!(node_id = %self.table.local_id(), "gossip agent stopped");
    }

    fn next_deadline(&self) -> Instant {
        self.pending
            .values()
            .map(|probe| probe.deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
    }

    fn allocate_probe_id(&mut self) -> u64 {
        let id = self.next_probe_id;
        self.next_probe_id = self.next_probe_id.wrapping_add(1);
        id
    }

    fn piggyback(&self) -> Vec<MemberUpdate> {
        self.table.updates_for_gossip(self.config.max_piggyback)
    }

    async fn send(&self, target: SocketAddr, message: GossipMessage) {
        let kind = message.kind();
        match message.encode_bounded(MAX_DATAGRAM_BYTES) {
            Ok(bytes) => {
                if let Err(err) = self.transport.send_to(&bytes, target).await {
                    debug!(%target, kind, error = %err, "gossip send failed");
                }
            }
            Err(err) => warn!(%target, kind, error = %err, "gossip message not sent"),
        }
    }

    // ---- probing ----

    async fn probe_round(&mut self) {
        self.table.bump_local_heartbeat();
        let now_ms = self.table.now_ms();
        self.table.tick(now_ms);

        let Some((target, addr)) = self.next_target() else {
            trace!("no gossip peers to probe");
            return;
        };
        let probe_id = self.allocate_probe_id();
        let message = GossipMessage::Ping {
            from: self.table.local_id(),
            probe_id,
            updates: self.piggyback(),
        };
        self.send(addr, message).await;

        let started = Instant::now();
        self.pending.insert(
            probe_id,
            PendingProbe {
                target,
                stage: ProbeStage::Direct,
                started,
                deadline: started + self.config.probe_timeout(),
            },
        );
        trace!(node_id = %target, probe_id, "sent probe");
    }

    fn next_target(&mut self) -> Option<(NodeId, SocketAddr)> {
        for _ in 0..2 {
            if self.probe_order.is_empty() {
                let mut ids: Vec<NodeId> = self
                    .table
                    .probe_targets()
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                ids.shuffle(&mut self.rng);
                self.probe_order = ids;
            }
            while let Some(id) = self.probe_order.pop() {
                if let Some(addr) = self.table.probe_addr(id) {
                    return Some((id, addr));
                }
            }
        }
        None
    }

    async fn expire_probes(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, probe)| probe.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for probe_id in expired {
            let Some(probe) = self.pending.remove(&probe_id) else {
                continue;
            };
            match probe.stage {
                ProbeStage::Direct => self.escalate(probe_id, probe).await,
                ProbeStage::Indirect => {
                    let now_ms = self.table.now_ms();
                    if self.table.probe_failed(probe.target, now_ms) {
                        debug!(node_id = %probe.target, "probe round failed");
                    }
                }
                ProbeStage::Forward { .. } => {
                    trace!(node_id = %probe.target, "indirect probe on behalf of peer timed out");
                }
            }
        }
    }

    async fn escalate(&mut self, probe_id: u64, probe: PendingProbe) {
        let Some(target_addr) = self.table.probe_addr(probe.target) else {
            return;
        };
        let helpers: Vec<(NodeId, SocketAddr)> = self
            .table
            .indirect_helpers(probe.target)
            .choose_multiple(&mut self.rng, self.config.indirect_probes)
            .copied()
            .collect();

        if helpers.is_empty() {
            let now_ms = self.table.now_ms();
            self.table.probe_failed(probe.target, now_ms);
            return;
        }

        for (helper, helper_addr) in &helpers {
            let message = GossipMessage::PingReq {
                from: self.table.local_id(),
                probe_id,
                target: probe.target,
                target_addr,
                updates: self.piggyback(),
            };
            trace!(node_id = %probe.target, helper = %helper, "requesting indirect probe");
            self.send(*helper_addr, message).await;
        }

        self.pending.insert(
            probe_id,
            PendingProbe {
                stage: ProbeStage::Indirect,
                deadline: probe.started + self.config.probe_interval(),
                ..probe
            },
        );
    }

    // ---- receiving ----

    async fn handle_datagram(&mut self, bytes: &[u8], src: SocketAddr) {
        let message = match GossipMessage::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!(%src, error = %err, "dropping undecodable gossip datagram");
                return;
            }
        };
        let local_id = self.table.local_id();

        match message {
            GossipMessage::Ping {
                from,
                probe_id,
                updates,
            } => {
                self.absorb(from, &updates);
                let ack = GossipMessage::Ack {
                    from: local_id,
                    probe_id,
                    target: local_id,
                    updates: self.piggyback(),
                };
                self.send(src, ack).await;
            }
            GossipMessage::Ack {
                from,
                probe_id,
                target,
                updates,
            } => {
                self.absorb(from, &updates);
                self.complete_probe(probe_id, target).await;
            }
            GossipMessage::PingReq {
                from,
                probe_id,
                target,
                target_addr,
                updates,
            } => {
                self.absorb(from, &updates);
                if target == local_id {
                    let ack = GossipMessage::Ack {
                        from: local_id,
                        probe_id,
                        target: local_id,
                        updates: self.piggyback(),
                    };
                    self.send(src, ack).await;
                    return;
                }
                let forward_id = self.allocate_probe_id();
                let ping = GossipMessage::Ping {
                    from: local_id,
                    probe_id: forward_id,
                    updates: self.piggyback(),
                };
                self.send(target_addr, ping).await;
                let started = Instant::now();
                self.pending.insert(
                    forward_id,
                    PendingProbe {
                        target,
                        stage: ProbeStage::Forward {
                            requester: src,
                            requester_probe_id: probe_id,
                        },
                        started,
                        deadline: started + self.config.probe_timeout(),
                    },
                );
            }
            GossipMessage::Report {
                active_calls,
                cpu_pct,
            } => {
                if src.ip().is_loopback() {
                    let version = self
                        .table
                        .set_local_load(LoadMetrics::new(active_calls, cpu_pct));
                    trace!(active_calls, cpu_pct, %version, "local metrics reported");
                } else {
                    warn!(%src, "ignoring metrics report from non-loopback source");
                }
            }
        }
    }

    fn absorb(&self, from: NodeId, updates: &[MemberUpdate]) {
        let now_ms = self.table.now_ms();
        for update in updates {
            let evidence = if update.node_id == from {
                Evidence::Direct
            } else {
                Evidence::Gossip
            };
            self.table.apply_update(update, evidence, now_ms);
        }
    }

    async fn complete_probe(&mut self, probe_id: u64, target: NodeId) {
        let matches = self
            .pending
            .get(&probe_id)
            .is_some_and(|probe| probe.target == target);
        if !matches {
            return;
        }
        let Some(probe) = self.pending.remove(&probe_id) else {
            return;
        };
        match probe.stage {
            ProbeStage::Direct | ProbeStage::Indirect => {
                trace!(node_id = %target, probe_id, "probe acknowledged");
            }
            ProbeStage::Forward {
                requester,
                requester_probe_id,
            } => {
                let ack = GossipMessage::Ack {
                    from: self.table.local_id(),
                    probe_id: requester_probe_id,
                    target,
                    updates: self.piggyback(),
                };
                self.send(requester, ack).await;
            }
        }
    }

    // ---- peers ----

    async fn refresh_peers(&self) {
        let Some((registry, gossip_port)) = &self.registry else {
            return;
        };
        let deadline = Deadline::after(self.config.probe_interval());
        match registry.list_all(deadline).await {
            Ok(nodes) => {
                let added = nodes
                    .iter()
                    .filter(|node| {
                        self.table
                            .ensure_member(node.id, SocketAddr::new(node.private_addr, *gossip_port))
                    })
                    .count();
                if added > 0 {
                    debug!(added, total = nodes.len(), "refreshed gossip peers from registry");
                }
            }
            Err(err) => warn!(error = %err, "failed to refresh gossip peers from registry"),
        }
    }

    async fn announce_leave(&mut self) {
        let update = self.table.leave();
        let local_id = self.table.local_id();
        for (node_id, addr) in self.table.probe_targets() {
            let probe_id = self.allocate_probe_id();
            let message = GossipMessage::Ping {
                from: local_id,
                probe_id,
                updates: vec![update.clone()],
            };
            trace!(node_id = %node_id, "announcing departure");
            self.send(addr, message).await;
        }
    }
}

/// Handle to a running [`GossipAgent`].
#[derive(Debug)]
pub struct AgentHandle {
    table: Arc<MembershipTable>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// The agent's membership table.
    #[must_use]
    pub fn table(&self) -> Arc<MembershipTable> {
        Arc::clone(&self.table)
    }

    /// Subscribe to membership transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.table.subscribe()
    }

    /// Publish new local load; the next gossip round disseminates it.
    pub fn report_metrics(&self, active_calls: u32, cpu_pct: f32) -> Version {
        self.table
            .set_local_load(LoadMetrics::new(active_calls, cpu_pct))
    }

    /// Add a peer to probe. Returns whether it was new.
    pub fn add_peer(&self, node_id: NodeId, addr: SocketAddr) -> bool {
        self.table.ensure_member(node_id, addr)
    }

    /// Announce departure and stop the agent.
    ///
    /// # Errors
    /// Returns [`GossipError::Task`] if the agent task panicked.
    pub async fn shutdown(self) -> Result<(), GossipError> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|err| GossipError::Task(err.to_string()))
    }
}
