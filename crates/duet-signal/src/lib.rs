//! Duet Signal Server
//!
//! Signaling for two-party WebRTC chat. Browsers connect over WebSocket and
//! exchange offers, answers and ICE candidates through this server until
//! their direct connection is up.
//!
//! # Modes
//!
//! - **room-code**: a host creates a six-character room, a guest joins it,
//!   and handshake frames are forwarded verbatim between the two.
//! - **lan**: instances announce themselves over UDP broadcast, link to each
//!   other over WebSocket, and relay handshake frames instance to instance.
//!
//! HTTP pages and health checks share the WebSocket port.

pub mod discovery;
pub mod http;
pub mod mesh;
pub mod messages;
pub mod relay;
pub mod rooms;
pub mod server;

pub use discovery::{Discovery, DiscoveryEvent, DiscoveryPacket, DiscoverySubscriber, PeerRecord};
pub use mesh::{MeshEvent, PeerMesh};
pub use messages::{PeerSummary, SignalMessage};
pub use relay::SignalingRelay;
pub use rooms::{ConnectionId, Room, RoomManager};
pub use server::SignalServer;
