//! Datagram transports for gossip.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::trace;

use crate::GossipError;

/// Unreliable datagram transport.
///
/// Sends never report delivery; a datagram may be silently lost.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Address peers should send to.
    fn local_addr(&self) -> SocketAddr;

    /// Send one datagram.
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<(), GossipError>;

    /// Receive one datagram into `buf`, returning its length and sender.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GossipError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// UDP
// ─────────────────────────────────────────────────────────────────────────────

/// UDP transport.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind a UDP socket on `addr`.
    ///
    /// # Errors
    /// Returns [`GossipError::Io`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, GossipError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }
}

#[async_trait]
impl GossipTransport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<(), GossipError> {
        self.socket.send_to(payload, target).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GossipError> {
        Ok(self.socket.recv_from(buf).await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory network
// ─────────────────────────────────────────────────────────────────────────────

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Debug, Default)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    blocked: HashSet<(SocketAddr, SocketAddr)>,
}

/// Simulated datagram network with partitions.
///
/// Datagrams to unbound or partitioned addresses are dropped silently.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint at `addr`, replacing any previous endpoint there.
    #[must_use]
    pub fn bind(&self, addr: SocketAddr) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().endpoints.insert(addr, tx);
        MemoryTransport {
            network: self.clone(),
            local_addr: addr,
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Detach the endpoint at `addr`; its pending receive fails with
    /// [`GossipError::Closed`].
    pub fn unbind(&self, addr: SocketAddr) {
        self.state.lock().endpoints.remove(&addr);
    }

    /// Drop all traffic between the two groups, in both directions.
    pub fn partition(&self, left: &[SocketAddr], right: &[SocketAddr]) {
        let mut state = self.state.lock();
        for a in left {
            for b in right {
                state.blocked.insert((*a, *b));
                state.blocked.insert((*b, *a));
            }
        }
    }

    /// Remove every partition.
    pub fn heal(&self) {
        self.state.lock().blocked.clear();
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, payload: &[u8]) {
        let state = self.state.lock();
        if state.blocked.contains(&(from, to)) {
            trace!(%from, %to, "partitioned; dropping datagram");
            return;
        }
        if let Some(endpoint) = state.endpoints.get(&to) {
            let _ = endpoint.send((payload.to_vec(), from));
        }
    }
}

/// Endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_addr: SocketAddr,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

#[async_trait]
impl GossipTransport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<(), GossipError> {
        self.network.deliver(self.local_addr, target, payload);
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GossipError> {
        let (payload, from) = self
            .inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(GossipError::Closed)?;
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok((len, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 7946))
    }

    #[tokio::test]
    async fn memory_network_delivers_and_partitions() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr(1));
        let b = network.bind(addr(2));

        a.send_to(b"hello", addr(2)).await.expect("send");
        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, addr(1));

        network.partition(&[addr(1)], &[addr(2)]);
        a.send_to(b"lost", addr(2)).await.expect("send");
        network.heal();
        a.send_to(b"again", addr(2)).await.expect("send");
        let (len, _) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..len], b"again");
    }

    #[tokio::test]
    async fn sends_to_unbound_addresses_are_dropped() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr(1));
        assert!(a.send_to(b"void", addr(9)).await.is_ok());
    }

    #[tokio::test]
    async fn unbound_endpoint_reports_closed() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr(1));
        network.unbind(addr(1));
        let mut buf = [0u8; 4];
        assert!(matches!(a.recv_from(&mut buf).await, Err(GossipError::Closed)));
    }

    #[tokio::test]
    async fn udp_transport_round_trip() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let b = UdpTransport::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        a.send_to(b"ping", b.local_addr()).await.expect("send");
        let mut buf = [0u8; 8];
        let (len, from) = b.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr());
    }
}
