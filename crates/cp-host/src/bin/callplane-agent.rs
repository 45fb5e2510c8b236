//! Gossip agent for one callplane node.
//!
//! # Usage
//!
//! ```bash
//! callplane-agent --config /etc/callplane/agent.toml --seed /etc/callplane/seed.toml
//! ```
//!
//! Peers are taken from the node registry and probed on their private
//! address. Local services push load with a `report` datagram sent to the
//! agent's gossip port from loopback. Ctrl-C announces departure and exits.
//!
//! The agent only runs membership. The `[admission]` table and the seed's
//! whitelist, blocklist and DID rows are parsed and validated here but not
//! used: call admission runs in the signalling process, which builds a
//! [`cp_host::CallPlane`] from the same files.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cp_core::{Deadline, NodeStore};
use cp_host::CallplaneConfig;
use cp_mesh::{GossipAgent, GossipTransport, MembershipEvent, MembershipTable, UdpTransport, wall_clock_incarnation};
use cp_registry::NodeRegistry;
use cp_store::{MemoryStore, SeedData};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Budget for the startup registry lookup of this node.
const STARTUP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Callplane gossip agent.
#[derive(Parser, Debug)]
#[command(name = "callplane-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node configuration file.
    #[arg(short, long, default_value = "callplane.toml")]
    config: PathBuf,

    /// Seed file for the node registry and admission tables.
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CallplaneConfig::from_path(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    cp_telemetry::init_tracing(&config.logging).context("initializing logging")?;

    let store = match &args.seed {
        Some(path) => {
            let seed = SeedData::load(path)
                .with_context(|| format!("loading seed {}", path.display()))?;
            MemoryStore::from_seed(seed)
        }
        None => MemoryStore::new(),
    };
    let store: Arc<dyn NodeStore> = Arc::new(store);
    let registry = NodeRegistry::new(store);

    let transport = UdpTransport::bind(config.node.bind_addr())
        .await
        .with_context(|| format!("binding gossip socket {}", config.node.bind_addr()))?;
    let advertise = advertise_addr(&config, &registry, transport.local_addr()).await;

    let table = Arc::new(MembershipTable::new(
        config.node.id,
        wall_clock_incarnation(),
        Some(advertise),
        &config.gossip,
    ));
    let handle = GossipAgent::new(table, Arc::new(transport), config.gossip.clone())
        .with_registry(registry, config.node.gossip_port)
        .spawn();
    info!(node_id = %config.node.id, %advertise, "callplane agent running");

    let events = tokio::spawn(log_events(handle.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    handle.shutdown().await.context("stopping gossip agent")?;
    events.abort();
    Ok(())
}

/// Configured advertise address, else the node's registered private address,
/// else the bound address.
async fn advertise_addr(
    config: &CallplaneConfig,
    registry: &NodeRegistry,
    bound: SocketAddr,
) -> SocketAddr {
    if let Some(ip) = config.node.advertise_ip {
        return SocketAddr::new(ip, bound.port());
    }
    match registry
        .get_node(config.node.id, Deadline::after(STARTUP_LOOKUP_TIMEOUT))
        .await
    {
        Ok(Some(node)) => SocketAddr::new(node.private_addr, bound.port()),
        Ok(None) => {
            warn!(node_id = %config.node.id, "node not in registry; advertising bound address");
            bound
        }
        Err(err) => {
            warn!(node_id = %config.node.id, error = %err, "registry unavailable; advertising bound address");
            bound
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<MembershipEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event {
                MembershipEvent::Suspected { node_id } => warn!(%node_id, "member suspected"),
                MembershipEvent::Failed { node_id } => warn!(%node_id, "member failed"),
                MembershipEvent::Rejoined { node_id, incarnation } => {
                    info!(%node_id, incarnation, "member rejoined");
                }
                other => info!(node_id = %other.node_id(), event = ?other, "membership changed"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "membership event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
