//! Duet Core - Shared identifiers, configuration and error types
//!
//! This crate contains the foundational types used by the Duet signaling server.
//! It has no dependencies on networking code.

pub mod codes;
pub mod config;
pub mod error;

pub use codes::{generate_peer_id, generate_room_code, is_valid_room_code, normalize_room_code};
pub use config::{Config, ConfigError, DiscoveryConfig, RoomConfig, ServerConfig, SignalMode};
pub use error::{ErrorCode, SignalError};

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// UDP port used for LAN announcements
pub const DISCOVERY_PORT: u16 = 41234;

/// Handshake header identifying a server-to-server link
pub const PEER_ID_HEADER: &str = "x-peer-id";
