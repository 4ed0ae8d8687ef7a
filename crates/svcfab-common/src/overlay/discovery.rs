//! Rendezvous discovery over link-local multicast.
//!
//! Each node periodically announces `(node id, overlay port, rendezvous key)`
//! datagrams to the all-nodes multicast group; listeners fold announcements
//! into a TTL'd registry that backs `Overlay::find_peers` and the dial
//! address book. Announcements carry a PSK-derived network tag so co-located
//! fabrics ignore each other.
//!
//! Bootstrap peers from configuration are pinned: they are folded into the
//! same registry but never expire.

use std::collections::HashSet;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::identity::NodeId;
use crate::protocol::error::Result;

/// UDP port on which announcements are exchanged.
pub const ANNOUNCE_PORT: u16 = 9411;

/// Link-local all-nodes multicast group.
pub const MULTICAST_ADDR: &str = "ff02::1";

/// How often each advertised rendezvous key is re-announced.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Announcements older than this are expired from the registry.
const PEER_TTL: Duration = Duration::from_secs(10);

/// One discovery datagram. Postcard-encoded; anything that fails to decode
/// or carries a foreign network tag is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// PSK-derived fabric tag - see [`network_tag`].
    pub tag: [u8; 8],
    pub node_id: NodeId,
    /// UDP port of the announcer's overlay endpoint.
    pub overlay_port: u16,
    /// Rendezvous key the announcer serves: the allocator rendezvous or a
    /// service hash.
    pub rendezvous: String,
}

/// Derive the fabric network tag from the pre-shared key.
pub fn network_tag(psk: &str) -> [u8; 8] {
    let digest = blake3::hash(psk.as_bytes());
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest.as_bytes()[..8]);
    tag
}

#[derive(Debug, Clone)]
struct Sighting {
    id: NodeId,
    last_seen: Instant,
    pinned: bool,
}

#[derive(Debug, Clone)]
struct DialEntry {
    addr: SocketAddr,
    last_seen: Instant,
    pinned: bool,
}

/// The rendezvous registry shared by the announce, listen, and expiry tasks.
pub struct MulticastDiscovery {
    local: NodeId,
    tag: [u8; 8],
    interface_index: u32,
    overlay_port: AtomicU16,
    advertised: RwLock<HashSet<String>>,
    peers: DashMap<String, Vec<Sighting>>,
    addrs: DashMap<NodeId, DialEntry>,
}

impl MulticastDiscovery {
    /// Create a registry bound to a network interface (empty name = let the
    /// OS pick the default multicast interface).
    pub fn new(local: NodeId, psk: &str, interface: &str) -> Result<Self> {
        let interface_index = if interface.is_empty() {
            0
        } else {
            if_index(interface)?
        };
        Ok(Self {
            local,
            tag: network_tag(psk),
            interface_index,
            overlay_port: AtomicU16::new(0),
            advertised: RwLock::new(HashSet::new()),
            peers: DashMap::new(),
            addrs: DashMap::new(),
        })
    }

    /// Record the bound overlay endpoint port. Announcements are suppressed
    /// until this is set.
    pub fn set_overlay_port(&self, port: u16) {
        self.overlay_port.store(port, Ordering::Relaxed);
    }

    /// Start advertising under `rendezvous` on the next announce tick.
    pub fn advertise(&self, rendezvous: &str) {
        self.advertised
            .write()
            .expect("advertised set poisoned")
            .insert(rendezvous.to_string());
    }

    /// Peers currently known under `rendezvous`.
    pub fn find(&self, rendezvous: &str) -> Vec<NodeId> {
        self.peers
            .get(rendezvous)
            .map(|sightings| sightings.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    /// Dial address for a discovered peer.
    pub fn addr_of(&self, peer: &NodeId) -> Option<SocketAddr> {
        self.addrs.get(peer).map(|entry| entry.addr)
    }

    /// Pin a peer that should never expire (bootstrap peers from config).
    pub fn pin_peer(&self, rendezvous: &str, id: NodeId, addr: SocketAddr) {
        self.upsert(rendezvous, id, addr, true);
    }

    fn upsert(&self, rendezvous: &str, id: NodeId, addr: SocketAddr, pinned: bool) {
        let now = Instant::now();
        let mut sightings = self.peers.entry(rendezvous.to_string()).or_default();
        match sightings.iter_mut().find(|s| s.id == id) {
            Some(existing) => {
                existing.last_seen = now;
                existing.pinned = existing.pinned || pinned;
            }
            None => sightings.push(Sighting {
                id,
                last_seen: now,
                pinned,
            }),
        }
        drop(sightings);

        let mut entry = self.addrs.entry(id).or_insert(DialEntry {
            addr,
            last_seen: now,
            pinned,
        });
        entry.addr = addr;
        entry.last_seen = now;
        entry.pinned = entry.pinned || pinned;
    }

    /// Drop non-pinned entries older than `ttl`.
    fn prune(&self, ttl: Duration) {
        for mut sightings in self.peers.iter_mut() {
            sightings.retain(|s| s.pinned || s.last_seen.elapsed() < ttl);
        }
        self.peers.retain(|_, sightings| !sightings.is_empty());
        self.addrs
            .retain(|_, entry| entry.pinned || entry.last_seen.elapsed() < ttl);
    }

    /// Spawn the announce, listen, and expiry tasks. All exit when the root
    /// token is cancelled.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let announcer = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = this.announce_loop(cancel).await {
                    tracing::warn!(error = %e, "discovery announcer stopped");
                }
            })
        };
        let listener = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = this.listen_loop(cancel).await {
                    tracing::warn!(error = %e, "discovery listener stopped");
                }
            })
        };
        let expiry = {
            let this = self.clone();
            tokio::spawn(async move {
                this.expiry_loop(cancel).await;
            })
        };
        vec![announcer, listener, expiry]
    }

    async fn announce_loop(&self, cancel: CancellationToken) -> Result<()> {
        let socket = make_send_socket(self.interface_index)?;
        let group: Ipv6Addr = MULTICAST_ADDR.parse().expect("multicast group literal");
        let dest = SocketAddrV6::new(group, ANNOUNCE_PORT, 0, self.interface_index);
        let mut interval = tokio::time::interval(ANNOUNCE_INTERVAL);

        tracing::info!(
            interface_index = self.interface_index,
            "discovery announcer starting"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            let overlay_port = self.overlay_port.load(Ordering::Relaxed);
            if overlay_port == 0 {
                continue;
            }

            let keys: Vec<String> = self
                .advertised
                .read()
                .expect("advertised set poisoned")
                .iter()
                .cloned()
                .collect();

            for rendezvous in keys {
                let announcement = Announcement {
                    tag: self.tag,
                    node_id: self.local,
                    overlay_port,
                    rendezvous,
                };
                let bytes = postcard::to_allocvec(&announcement)?;
                if let Err(e) = socket.send_to(&bytes, &dest.into()) {
                    tracing::warn!(error = %e, "announcement send failed");
                }
            }
        }
    }

    async fn listen_loop(&self, cancel: CancellationToken) -> Result<()> {
        let socket = make_listen_socket(self.interface_index)?;
        let socket = UdpSocket::from_std(socket)?;
        let mut buf = vec![0u8; 2048];

        tracing::info!(port = ANNOUNCE_PORT, "discovery listener starting");

        loop {
            let (len, sender) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                recv = socket.recv_from(&mut buf) => match recv {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                }
            };

            let sender = match sender {
                SocketAddr::V6(v6) => v6,
                SocketAddr::V4(_) => continue,
            };

            let announcement: Announcement = match postcard::from_bytes(&buf[..len]) {
                Ok(a) => a,
                Err(_) => {
                    tracing::trace!("undecodable announcement ignored");
                    continue;
                }
            };

            if announcement.tag != self.tag || announcement.node_id == self.local {
                continue;
            }

            let dial = SocketAddrV6::new(
                *sender.ip(),
                announcement.overlay_port,
                0,
                sender.scope_id(),
            );
            tracing::debug!(
                peer = %announcement.node_id.short(),
                rendezvous = %announcement.rendezvous,
                addr = %dial,
                "peer discovered"
            );
            self.upsert(
                &announcement.rendezvous,
                announcement.node_id,
                SocketAddr::V6(dial),
                false,
            );
        }
    }

    async fn expiry_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            self.prune(PEER_TTL);
        }
    }
}

/// UDP socket suitable for sending to the link-local multicast group.
fn make_send_socket(interface_index: u32) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if interface_index != 0 {
        socket.set_multicast_if_v6(interface_index)?;
    }
    // Hop limit 1: announcements never leave the local link.
    socket.set_multicast_hops_v6(1)?;
    Ok(socket)
}

/// UDP socket joined to the multicast group on the announce port.
fn make_listen_socket(interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_only_v6(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, ANNOUNCE_PORT, 0, 0);
    socket.bind(&bind_addr.into())?;

    let group: Ipv6Addr = MULTICAST_ADDR.parse().expect("multicast group literal");
    socket.join_multicast_v6(&group, interface_index)?;

    Ok(socket.into())
}

/// OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name)
        .map_err(|_| crate::FabricError::Config("interface name contains null byte".into()))?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        return Err(crate::FabricError::Config(format!(
            "interface '{}' not found",
            name
        )));
    }
    Ok(index)
}
