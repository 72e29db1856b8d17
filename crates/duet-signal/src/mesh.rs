//! Relay links between server instances
//!
//! For every discovered peer the mesh dials `ws://address:httpPort/` with an
//! `x-peer-id` header naming this instance. The remote side registers the
//! accepted socket as an inbound link for the same peer. Either direction
//! may carry forwarded signaling at any time; at most one link per peer is
//! used for sending.
//!
//! When two instances dial each other at once, the dial placed by the lower
//! peer ID is kept on both ends. The other side registers that socket and
//! drops its own dial; the losing socket is only ever read from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use duet_core::{SignalError, PEER_ID_HEADER};

use crate::discovery::{DiscoverySubscriber, PeerRecord};

/// Timeout for dialing a peer instance
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue of a WebSocket connection
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Identifies one link so a stale close cannot remove its replacement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkId(u64);

impl LinkId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Events produced by relay links
#[derive(Clone, Debug, PartialEq)]
pub enum MeshEvent {
    /// A text frame arrived from a peer instance
    MessageReceived { from_peer_id: String, text: String },
}

struct PeerLink {
    id: LinkId,
    /// `None` while the dial is in progress
    sender: Option<Outbound>,
    /// Dial/pump task for outbound links
    task: Option<AbortHandle>,
}

impl PeerLink {
    fn is_outbound(&self) -> bool {
        self.task.is_some()
    }
}

struct MeshInner {
    local_peer_id: String,
    links: Mutex<HashMap<String, PeerLink>>,
    event_tx: mpsc::UnboundedSender<MeshEvent>,
}

/// Live relay links keyed by peer ID
#[derive(Clone)]
pub struct PeerMesh {
    inner: Arc<MeshInner>,
}

impl PeerMesh {
    /// Create a mesh and the receiver for its message events
    pub fn new(local_peer_id: String) -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mesh = Self {
            inner: Arc::new(MeshInner {
                local_peer_id,
                links: Mutex::new(HashMap::new()),
                event_tx,
            }),
        };
        (mesh, event_rx)
    }

    pub fn local_peer_id(&self) -> &str {
        &self.inner.local_peer_id
    }

    /// Start dialing a newly discovered peer
    ///
    /// A no-op if any link (open or dialing) already exists for it.
    pub fn connect(&self, peer: &PeerRecord) {
        let mut links = self.inner.links.lock();
        if links.contains_key(&peer.peer_id) {
            debug!("Link to {} already present", peer.peer_id);
            return;
        }

        let id = LinkId::next();
        let task = tokio::spawn(self.clone().dial(peer.clone(), id));
        links.insert(
            peer.peer_id.clone(),
            PeerLink {
                id,
                sender: None,
                task: Some(task.abort_handle()),
            },
        );
    }

    /// Drop the link to a peer that went away
    pub fn disconnect(&self, peer_id: &str) {
        if let Some(link) = self.inner.links.lock().remove(peer_id) {
            if let Some(task) = link.task {
                task.abort();
            }
            info!("Relay link to {} dropped", peer_id);
        }
    }

    /// Register an accepted server-to-server socket
    ///
    /// Returns `None` when our own dial to this peer takes precedence; the
    /// socket is then only read from. Otherwise the socket becomes the link,
    /// replacing an older inbound socket or our own (pending or open) dial.
    pub fn register_inbound(&self, peer_id: &str, sender: Outbound) -> Option<LinkId> {
        let mut links = self.inner.links.lock();

        if links.get(peer_id).is_some_and(PeerLink::is_outbound) && self.dial_wins(peer_id) {
            debug!("Inbound link from {} kept read-only", peer_id);
            return None;
        }

        let id = LinkId::next();
        let previous = links.insert(
            peer_id.to_string(),
            PeerLink {
                id,
                sender: Some(sender),
                task: None,
            },
        );
        // The remote keeps its dial, so ours goes
        if let Some(task) = previous.and_then(|l| l.task) {
            task.abort();
        }

        info!("Peer server connected: {}", peer_id);
        Some(id)
    }

    /// Remove a link if it is still the one registered under `peer_id`
    pub fn unregister(&self, peer_id: &str, id: LinkId) {
        let mut links = self.inner.links.lock();
        if links.get(peer_id).is_some_and(|l| l.id == id) {
            links.remove(peer_id);
            info!("Peer server disconnected: {}", peer_id);
        }
    }

    /// Forward a text frame to a peer instance
    pub fn send(&self, peer_id: &str, text: String) -> Result<(), SignalError> {
        let links = self.inner.links.lock();
        let sender = links
            .get(peer_id)
            .and_then(|l| l.sender.as_ref())
            .ok_or_else(|| SignalError::RelayTargetUnavailable(peer_id.to_string()))?;

        sender
            .send(Message::Text(text))
            .map_err(|_| SignalError::RelayTargetUnavailable(peer_id.to_string()))
    }

    /// Hand a frame received from `from_peer_id` to the event consumer
    pub fn deliver(&self, from_peer_id: &str, text: String) {
        let event = MeshEvent::MessageReceived {
            from_peer_id: from_peer_id.to_string(),
            text,
        };
        if self.inner.event_tx.send(event).is_err() {
            debug!("Mesh event consumer gone, dropping frame from {}", from_peer_id);
        }
    }

    /// Whether our dial to `peer_id` beats the one it places to us
    fn dial_wins(&self, peer_id: &str) -> bool {
        self.inner.local_peer_id.as_str() < peer_id
    }

    pub fn is_linked(&self, peer_id: &str) -> bool {
        self.inner
            .links
            .lock()
            .get(peer_id)
            .is_some_and(|l| l.sender.is_some())
    }

    pub fn link_count(&self) -> usize {
        self.inner
            .links
            .lock()
            .values()
            .filter(|l| l.sender.is_some())
            .count()
    }

    /// Abort every link
    pub fn shutdown(&self) {
        let links: Vec<PeerLink> = self.inner.links.lock().drain().map(|(_, l)| l).collect();
        for task in links.into_iter().filter_map(|l| l.task) {
            task.abort();
        }
    }

    async fn dial(self, peer: PeerRecord, id: LinkId) {
        match self.run_outbound(&peer, id).await {
            Ok(()) => debug!("Relay link to {} closed", peer.peer_id),
            Err(e) => warn!("Peer connection error ({}): {}", peer.peer_id, e),
        }

        let mut links = self.inner.links.lock();
        if links.get(&peer.peer_id).is_some_and(|l| l.id == id) {
            links.remove(&peer.peer_id);
        }
    }

    async fn run_outbound(&self, peer: &PeerRecord, id: LinkId) -> Result<(), SignalError> {
        let mut request = format!("ws://{}/", peer.http_addr())
            .into_client_request()
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        let header = HeaderValue::from_str(&self.inner.local_peer_id)
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        request.headers_mut().insert(PEER_ID_HEADER, header);

        let (ws, _response) = timeout(DIAL_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| SignalError::Transport("dial timed out".into()))?
            .map_err(|e| SignalError::Transport(e.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut links = self.inner.links.lock();
            match links.get_mut(&peer.peer_id) {
                Some(link) if link.id == id => link.sender = Some(tx),
                // Peer left or an inbound link took over while dialing
                _ => return Ok(()),
            }
        }
        info!("Connected to peer server: {}", peer.peer_id);

        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(msg) => sink
                        .send(msg)
                        .await
                        .map_err(|e| SignalError::Transport(e.to_string()))?,
                    None => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.deliver(&peer.peer_id, text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(SignalError::Transport(e.to_string())),
                },
            }
        }

        let _ = sink.close().await;
        Ok(())
    }
}

impl DiscoverySubscriber for PeerMesh {
    fn on_peer_joined(&self, peer: &PeerRecord) {
        self.connect(peer);
    }

    fn on_peer_left(&self, peer: &PeerRecord) {
        self.disconnect(&peer.peer_id);
    }

    /// Re-dial a peer that is still announcing but lost its link
    fn on_peer_refreshed(&self, peer: &PeerRecord) {
        if !self.inner.links.lock().contains_key(&peer.peer_id) {
            debug!("Re-dialing {}", peer.peer_id);
            self.connect(peer);
        }
    }
}
