//! Signaling relay
//!
//! Routes messages from browser connections and peer links:
//! - room messages go to the [`RoomManager`]
//! - offer/answer/ice-candidate go to the room partner (room-code mode) or
//!   over the [`PeerMesh`] to `targetPeerId` (LAN mode)
//! - frames from peer links are delivered to every local browser
//!
//! Unresolvable targets are dropped with a warning. Nothing is queued.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use duet_core::{normalize_room_code, SignalError, SignalMode};

use crate::discovery::{Discovery, DiscoverySubscriber, PeerRecord};
use crate::mesh::{MeshEvent, Outbound, PeerMesh};
use crate::messages::{PeerSummary, SignalKind, SignalMessage, SignalPayload};
use crate::rooms::{ConnectionId, RoomManager};

/// LAN-mode collaborators
pub struct LanLinks {
    pub discovery: Arc<Discovery>,
    pub mesh: PeerMesh,
}

/// Inbound message router
pub struct SignalingRelay {
    rooms: Arc<RoomManager>,
    lan: Option<LanLinks>,
    /// Connected browsers and their outbound queues
    browsers: DashMap<ConnectionId, Outbound>,
}

impl SignalingRelay {
    /// Relay pairing browsers by room code
    pub fn room_code(rooms: Arc<RoomManager>) -> Self {
        Self {
            rooms,
            lan: None,
            browsers: DashMap::new(),
        }
    }

    /// Relay forwarding between discovered instances
    pub fn lan(rooms: Arc<RoomManager>, discovery: Arc<Discovery>, mesh: PeerMesh) -> Self {
        Self {
            rooms,
            lan: Some(LanLinks { discovery, mesh }),
            browsers: DashMap::new(),
        }
    }

    pub fn mode(&self) -> SignalMode {
        if self.lan.is_some() {
            SignalMode::Lan
        } else {
            SignalMode::RoomCode
        }
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn mesh(&self) -> Option<&PeerMesh> {
        self.lan.as_ref().map(|l| &l.mesh)
    }

    pub fn browser_count(&self) -> usize {
        self.browsers.len()
    }

    /// Register a browser connection
    ///
    /// In LAN mode the browser immediately receives the peer list.
    pub fn connect_browser(&self, sender: Outbound) -> ConnectionId {
        let conn = ConnectionId::next();
        if let Some(lan) = &self.lan {
            send_to(&sender, &peer_list(&lan.discovery));
        }
        self.browsers.insert(conn, sender);
        info!("Browser connected: {}", conn);
        conn
    }

    /// Forget a browser and release its room slot
    pub fn disconnect_browser(&self, conn: ConnectionId) {
        self.browsers.remove(&conn);

        if let Some(partner) = self.rooms.leave_room(conn) {
            self.send(partner, &SignalMessage::PeerLeft { peer_id: None });
        }
        info!("Browser disconnected: {}", conn);
    }

    /// Handle one text frame from a browser
    pub fn handle_browser_text(&self, conn: ConnectionId, text: &str) {
        let result = SignalMessage::from_json(text)
            .and_then(|msg| self.dispatch_browser(conn, msg, text));

        match result {
            Ok(()) => {}
            Err(e) if e.is_client_visible() => {
                debug!("Rejecting request from {}: {}", conn, e);
                self.send(conn, &SignalMessage::error(&e));
            }
            Err(e) => warn!("Dropped message from {}: {}", conn, e),
        }
    }

    fn dispatch_browser(
        &self,
        conn: ConnectionId,
        msg: SignalMessage,
        raw: &str,
    ) -> Result<(), SignalError> {
        match msg {
            SignalMessage::CreateRoom => {
                self.require_room_mode("create-room")?;
                let code = self.rooms.create_room(conn)?;
                self.send(conn, &SignalMessage::RoomCreated { code });
                Ok(())
            }

            SignalMessage::JoinRoom(request) => {
                self.require_room_mode("join-room")?;
                let code = normalize_room_code(request.code().ok_or(SignalError::MissingRoomCode)?);
                let outcome = self.rooms.join_or_create(&code, conn)?;

                self.send(
                    conn,
                    &SignalMessage::RoomJoined {
                        code: code.clone(),
                        is_host: outcome.is_host,
                    },
                );
                if outcome.has_existing_peer {
                    if let Some(partner) = self.rooms.get_peer(conn) {
                        self.send(
                            partner,
                            &SignalMessage::PeerJoined {
                                peer_id: None,
                                address: None,
                            },
                        );
                    }
                }
                info!(
                    "{} joined room {} as {}",
                    conn,
                    code,
                    if outcome.is_host { "host" } else { "guest" }
                );
                Ok(())
            }

            SignalMessage::CheckRoom(request) => {
                self.require_room_mode("check-room")?;
                let status = request
                    .code()
                    .map(|c| self.rooms.room_status(&normalize_room_code(c)))
                    .unwrap_or_default();
                self.send(
                    conn,
                    &SignalMessage::RoomStatus {
                        exists: status.exists,
                        is_full: status.is_full,
                    },
                );
                Ok(())
            }

            msg @ (SignalMessage::Offer(_)
            | SignalMessage::Answer(_)
            | SignalMessage::IceCandidate(_)) => match &self.lan {
                None => self.relay_to_partner(conn, raw),
                Some(lan) => match msg.into_signal() {
                    Some((kind, payload)) => self.relay_to_instance(lan, kind, payload),
                    None => Ok(()),
                },
            },

            SignalMessage::Unknown => {
                debug!("Unknown message type from {}: {}", conn, raw);
                Ok(())
            }

            other => {
                debug!("Ignoring server-side message from {}: {:?}", conn, other);
                Ok(())
            }
        }
    }

    fn require_room_mode(&self, what: &'static str) -> Result<(), SignalError> {
        match self.lan {
            None => Ok(()),
            Some(_) => Err(SignalError::UnsupportedInMode(what)),
        }
    }

    /// Room-code mode: forward the frame untouched
    fn relay_to_partner(&self, conn: ConnectionId, raw: &str) -> Result<(), SignalError> {
        let partner = self
            .rooms
            .get_peer(conn)
            .ok_or_else(|| SignalError::RelayTargetUnavailable(format!("partner of {}", conn)))?;

        let sender = self
            .browsers
            .get(&partner)
            .map(|s| s.value().clone())
            .ok_or_else(|| SignalError::RelayTargetUnavailable(partner.to_string()))?;

        sender
            .send(Message::Text(raw.to_string()))
            .map_err(|_| SignalError::RelayTargetUnavailable(partner.to_string()))
    }

    /// LAN mode: wrap with our peer ID and send over the mesh
    fn relay_to_instance(
        &self,
        lan: &LanLinks,
        kind: SignalKind,
        payload: SignalPayload,
    ) -> Result<(), SignalError> {
        let target = payload
            .target_peer_id
            .ok_or_else(|| SignalError::RelayTargetUnavailable("no targetPeerId".into()))?;

        let wrapped = SignalMessage::signal(
            kind,
            SignalPayload {
                target_peer_id: None,
                from_peer_id: Some(lan.mesh.local_peer_id().to_string()),
                data: payload.data,
            },
        );

        lan.mesh.send(&target, wrapped.to_json()?)
    }

    /// Handle one text frame from a peer instance
    ///
    /// Only handshake messages are accepted; they are re-tagged with the
    /// sending instance and delivered to every local browser.
    pub fn handle_peer_text(&self, from_peer_id: &str, text: &str) {
        let msg = match SignalMessage::from_json(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Invalid peer message from {}: {}", from_peer_id, e);
                return;
            }
        };

        let Some((kind, payload)) = msg.into_signal() else {
            debug!("Ignoring non-signaling frame from peer {}", from_peer_id);
            return;
        };

        let rewrapped = SignalMessage::signal(
            kind,
            SignalPayload {
                target_peer_id: None,
                from_peer_id: Some(from_peer_id.to_string()),
                data: payload.data,
            },
        );
        self.broadcast_to_browsers(&rewrapped);
    }

    pub fn handle_mesh_event(&self, event: MeshEvent) {
        match event {
            MeshEvent::MessageReceived { from_peer_id, text } => {
                self.handle_peer_text(&from_peer_id, &text)
            }
        }
    }

    /// Consume mesh events until shutdown
    pub async fn run_mesh_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<MeshEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_mesh_event(event),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Send to every connected browser
    pub fn broadcast_to_browsers(&self, msg: &SignalMessage) {
        let Ok(json) = msg.to_json() else { return };
        for entry in self.browsers.iter() {
            let _ = entry.value().send(Message::Text(json.clone()));
        }
    }

    fn send(&self, conn: ConnectionId, msg: &SignalMessage) {
        match self.browsers.get(&conn) {
            Some(sender) => send_to(sender.value(), msg),
            None => debug!("{} is gone, dropping {:?}", conn, msg),
        }
    }

    fn broadcast_peer_list(&self) {
        if let Some(lan) = &self.lan {
            self.broadcast_to_browsers(&peer_list(&lan.discovery));
        }
    }
}

impl DiscoverySubscriber for SignalingRelay {
    fn on_peer_joined(&self, peer: &PeerRecord) {
        let PeerSummary { peer_id, address } = peer.summary();
        self.broadcast_to_browsers(&SignalMessage::PeerJoined {
            peer_id: Some(peer_id),
            address: Some(address),
        });
        self.broadcast_peer_list();
    }

    fn on_peer_left(&self, peer: &PeerRecord) {
        self.broadcast_to_browsers(&SignalMessage::PeerLeft {
            peer_id: Some(peer.peer_id.clone()),
        });
        self.broadcast_peer_list();
    }
}

fn peer_list(discovery: &Discovery) -> SignalMessage {
    SignalMessage::PeerList {
        peers: discovery.peers().iter().map(PeerRecord::summary).collect(),
    }
}

fn send_to(sender: &Outbound, msg: &SignalMessage) {
    match msg.to_json() {
        Ok(json) => {
            let _ = sender.send(Message::Text(json));
        }
        Err(e) => warn!("Failed to encode {:?}: {}", msg, e),
    }
}
