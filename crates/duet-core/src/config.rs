//! Configuration system for Duet
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/com.duet.duet/config.toml
//! - Linux: ~/.config/duet/config.toml
//! - Windows: %APPDATA%/duet/duet/config/config.toml
//!
//! The `PORT` environment variable overrides `server.port`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket server settings
    pub server: ServerConfig,
    /// LAN discovery settings
    pub discovery: DiscoveryConfig,
    /// Room directory settings
    pub rooms: RoomConfig,
}

/// How browsers find their counterpart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalMode {
    /// Two browsers meet under a shared room code on this instance
    #[default]
    RoomCode,
    /// Instances discover each other over UDP and relay between themselves
    Lan,
}

impl std::fmt::Display for SignalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalMode::RoomCode => write!(f, "room-code"),
            SignalMode::Lan => write!(f, "lan"),
        }
    }
}

impl std::str::FromStr for SignalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "room-code" | "room" | "rooms" => Ok(SignalMode::RoomCode),
            "lan" | "discovery" => Ok(SignalMode::Lan),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: IpAddr,
    /// Listening port
    pub port: u16,
    /// Deployment mode
    pub mode: SignalMode,
    /// Directory holding index.html and chat.html (built-in pages if None)
    pub public_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: crate::DEFAULT_HTTP_PORT,
            mode: SignalMode::RoomCode,
            public_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// LAN discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// UDP port for announcements
    pub udp_port: u16,
    /// Interval between announcements (milliseconds)
    pub broadcast_interval_ms: u64,
    /// A peer not heard from for this long is dropped (milliseconds)
    pub peer_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            udp_port: crate::DISCOVERY_PORT,
            broadcast_interval_ms: 3000,
            peer_timeout_ms: 10_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Eviction sweep period (half the timeout)
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis((self.peer_timeout_ms / 2).max(1))
    }
}

/// Room directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Rooms older than this are evicted regardless of occupancy (milliseconds)
    pub stale_max_age_ms: u64,
    /// How often the stale sweep runs (milliseconds)
    pub cleanup_interval_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            stale_max_age_ms: 3_600_000,  // 1 hour
            cleanup_interval_ms: 3_600_000, // 1 hour
        }
    }
}

impl RoomConfig {
    pub fn stale_max_age(&self) -> Duration {
        Duration::from_millis(self.stale_max_age_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply environment overrides (`PORT`)
    pub fn apply_env(&mut self) {
        self.apply_port_override(std::env::var("PORT").ok().as_deref());
    }

    fn apply_port_override(&mut self, value: Option<&str>) {
        let Some(raw) = value else { return };
        match raw.trim().parse::<u16>() {
            Ok(port) => self.server.port = port,
            Err(_) => warn!("Ignoring invalid PORT value {:?}", raw),
        }
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "duet", "duet").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Render as a TOML config file
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
