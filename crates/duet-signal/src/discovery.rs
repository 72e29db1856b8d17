//! LAN discovery over UDP broadcast
//!
//! Every instance periodically announces `{peerId, httpPort, timestamp}` to
//! the broadcast address of each IPv4 interface and listens for the same
//! announcements from others. Peers that stop announcing are evicted after
//! the configured timeout.
//!
//! There is no authentication: anything on the broadcast segment can
//! announce itself.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use duet_core::DiscoveryConfig;

use crate::messages::PeerSummary;

/// Largest announcement we bother reading
const MAX_DATAGRAM: usize = 2048;

/// Announcement datagram
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPacket {
    pub peer_id: String,
    pub http_port: u16,
    pub timestamp: i64,
}

/// A live peer instance
#[derive(Clone, Debug, PartialEq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: IpAddr,
    pub http_port: u16,
    pub last_seen: Instant,
    /// Sender's clock at announcement time (ms since epoch)
    pub announced_timestamp: i64,
}

impl PeerRecord {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            peer_id: self.peer_id.clone(),
            address: self.address.to_string(),
        }
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.http_port)
    }
}

/// Discovery events
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    PeerJoined(PeerRecord),
    /// A known peer announced itself again
    PeerRefreshed(PeerRecord),
    PeerLeft(PeerRecord),
}

/// Consumer of discovery events
pub trait DiscoverySubscriber: Send + Sync {
    fn on_peer_joined(&self, peer: &PeerRecord);
    fn on_peer_left(&self, peer: &PeerRecord);

    fn on_peer_refreshed(&self, _peer: &PeerRecord) {}
}

/// Feed discovery events to `subscriber` until shutdown or the channel closes
pub async fn forward_events<S>(
    mut events: broadcast::Receiver<DiscoveryEvent>,
    subscriber: Arc<S>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: DiscoverySubscriber + ?Sized,
{
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DiscoveryEvent::PeerJoined(peer)) => subscriber.on_peer_joined(&peer),
                Ok(DiscoveryEvent::PeerRefreshed(peer)) => subscriber.on_peer_refreshed(&peer),
                Ok(DiscoveryEvent::PeerLeft(peer)) => subscriber.on_peer_left(&peer),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Discovery subscriber lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

/// Peer table plus the announce/listen/evict loops
pub struct Discovery {
    peer_id: String,
    http_port: u16,
    config: DiscoveryConfig,
    peers: Mutex<HashMap<String, PeerRecord>>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl Discovery {
    pub fn new(peer_id: String, http_port: u16, config: DiscoveryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            peer_id,
            http_port,
            config,
            peers: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Subscribe to peer-joined / peer-refreshed / peer-left events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of live peers
    pub fn peers(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<PeerRecord> = self.peers.lock().values().cloned().collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Our own announcement
    pub fn announcement(&self) -> serde_json::Result<Vec<u8>> {
        let packet = DiscoveryPacket {
            peer_id: self.peer_id.clone(),
            http_port: self.http_port,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        serde_json::to_vec(&packet)
    }

    /// Process one received datagram
    ///
    /// Returns the record if this peer was not known before; a known peer
    /// only emits a refresh event. Malformed datagrams and our own echoes
    /// are ignored.
    pub fn handle_datagram(&self, data: &[u8], from: IpAddr) -> Option<PeerRecord> {
        self.handle_datagram_at(data, from, Instant::now())
    }

    fn handle_datagram_at(&self, data: &[u8], from: IpAddr, now: Instant) -> Option<PeerRecord> {
        let packet: DiscoveryPacket = match serde_json::from_slice(data) {
            Ok(p) => p,
            Err(e) => {
                debug!("Ignoring malformed discovery datagram from {}: {}", from, e);
                return None;
            }
        };

        if packet.peer_id.is_empty() || packet.peer_id == self.peer_id {
            return None;
        }

        let record = PeerRecord {
            peer_id: packet.peer_id.clone(),
            address: from,
            http_port: packet.http_port,
            last_seen: now,
            announced_timestamp: packet.timestamp,
        };

        let existed = self
            .peers
            .lock()
            .insert(packet.peer_id, record.clone())
            .is_some();

        if existed {
            let _ = self.event_tx.send(DiscoveryEvent::PeerRefreshed(record));
            return None;
        }

        info!(
            "Peer discovered: {} at {}:{}",
            record.peer_id, record.address, record.http_port
        );
        let _ = self.event_tx.send(DiscoveryEvent::PeerJoined(record.clone()));
        Some(record)
    }

    /// Drop peers not heard from within the timeout
    pub fn evict_expired(&self) -> Vec<PeerRecord> {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> Vec<PeerRecord> {
        let timeout = self.config.peer_timeout();
        let expired: Vec<PeerRecord> = {
            let mut peers = self.peers.lock();
            let ids: Vec<String> = peers
                .values()
                .filter(|p| now.saturating_duration_since(p.last_seen) > timeout)
                .map(|p| p.peer_id.clone())
                .collect();
            ids.iter().filter_map(|id| peers.remove(id)).collect()
        };

        for peer in &expired {
            info!("Peer timeout: {}", peer.peer_id);
            let _ = self.event_tx.send(DiscoveryEvent::PeerLeft(peer.clone()));
        }

        expired
    }

    /// Bind the discovery socket with address reuse and broadcast enabled
    pub fn bind_socket(port: u16) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket.into())
    }

    /// Run announce, listen and eviction until shutdown
    ///
    /// All three share one task, so no tick overlaps a previous one.
    pub async fn run(self: Arc<Self>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Discovery listening on UDP port {} as {}",
            self.config.udp_port, self.peer_id
        );

        let mut announce = interval(self.config.broadcast_interval());
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = announce.tick() => self.announce(&socket).await,
                _ = sweep.tick() => {
                    self.evict_expired();
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => {
                        self.handle_datagram(&buf[..n], from.ip());
                    }
                    Err(e) => warn!("Discovery socket error: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Discovery stopped");
    }

    async fn announce(&self, socket: &UdpSocket) {
        let targets: Vec<SocketAddr> = broadcast_addresses()
            .into_iter()
            .map(|addr| SocketAddr::V4(SocketAddrV4::new(addr, self.config.udp_port)))
            .collect();
        self.announce_to(socket, &targets).await;
    }

    /// Send one announcement to each of `targets`
    pub async fn announce_to(&self, socket: &UdpSocket, targets: &[SocketAddr]) {
        let payload = match self.announcement() {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to encode announcement: {}", e);
                return;
            }
        };
        for target in targets {
            if let Err(e) = socket.send_to(&payload, target).await {
                debug!("Announcement to {} failed: {}", target, e);
            }
        }
    }
}

/// An IPv4 interface address and its netmask
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceV4 {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl InterfaceV4 {
    /// Directed broadcast address (`addr | !netmask`)
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !u32::from(self.netmask))
    }
}

/// Non-loopback IPv4 addresses of this host
pub fn local_ips() -> Vec<Ipv4Addr> {
    interfaces_v4().into_iter().map(|i| i.addr).collect()
}

/// Broadcast targets, one per interface, or the limited broadcast address
pub fn broadcast_addresses() -> Vec<Ipv4Addr> {
    broadcast_targets(&interfaces_v4())
}

fn broadcast_targets(interfaces: &[InterfaceV4]) -> Vec<Ipv4Addr> {
    let mut targets: Vec<Ipv4Addr> = Vec::new();
    for iface in interfaces {
        let addr = iface.broadcast();
        if !targets.contains(&addr) {
            targets.push(addr);
        }
    }
    if targets.is_empty() {
        targets.push(Ipv4Addr::BROADCAST);
    }
    targets
}

#[cfg(unix)]
fn interfaces_v4() -> Vec<InterfaceV4> {
    let mut out = Vec::new();
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY: getifaddrs fills `ifap` with a list we release with freeifaddrs.
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        warn!("getifaddrs failed: {}", io::Error::last_os_error());
        return out;
    }

    let mut cur = ifap;
    while !cur.is_null() {
        // SAFETY: `cur` is a node of the list returned above.
        let ifa = unsafe { &*cur };
        cur = ifa.ifa_next;

        if ifa.ifa_addr.is_null() || ifa.ifa_netmask.is_null() {
            continue;
        }
        if ifa.ifa_flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0 {
            continue;
        }
        // SAFETY: non-null sockaddr owned by the list.
        let family = unsafe { (*ifa.ifa_addr).sa_family } as i32;
        if family != libc::AF_INET {
            continue;
        }

        // SAFETY: AF_INET entries carry sockaddr_in for both address and mask.
        let (addr, mask) = unsafe {
            (
                &*(ifa.ifa_addr as *const libc::sockaddr_in),
                &*(ifa.ifa_netmask as *const libc::sockaddr_in),
            )
        };
        let addr = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
        let netmask = Ipv4Addr::from(u32::from_be(mask.sin_addr.s_addr));
        if addr.is_loopback() {
            continue;
        }
        out.push(InterfaceV4 { addr, netmask });
    }

    // SAFETY: `ifap` came from getifaddrs and is freed once.
    unsafe { libc::freeifaddrs(ifap) };
    out
}

#[cfg(not(unix))]
fn interfaces_v4() -> Vec<InterfaceV4> {
    Vec::new()
}
