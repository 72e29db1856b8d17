//! Room directory for the signal server
//!
//! A room pairs at most two connections (host and guest) under a short code.
//! Which room a connection belongs to is kept in a side table keyed by
//! [`ConnectionId`], so the transport never carries room state itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use duet_core::{generate_room_code, SignalError};

/// Opaque handle for a live transport connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique connection ID
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A two-slot rendezvous point
#[derive(Clone, Debug)]
pub struct Room {
    pub code: String,
    pub host: Option<ConnectionId>,
    pub guest: Option<ConnectionId>,
    pub created_at: Instant,
}

impl Room {
    fn new(code: String, host: ConnectionId) -> Self {
        Self {
            code,
            host: Some(host),
            guest: None,
            created_at: Instant::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.host.is_some() && self.guest.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.guest.is_none()
    }
}

/// Which room and slot a connection occupies
#[derive(Clone, Debug, PartialEq, Eq)]
struct RoomTag {
    code: String,
    is_host: bool,
}

/// Outcome of a successful `join_or_create`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    pub is_host: bool,
    /// The other slot is occupied and should be told someone arrived
    pub has_existing_peer: bool,
}

/// Answer to `check-room`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoomStatus {
    pub exists: bool,
    pub is_full: bool,
}

#[derive(Default)]
struct Directory {
    rooms: HashMap<String, Room>,
    tags: HashMap<ConnectionId, RoomTag>,
}

impl Directory {
    /// Clear whatever slot `conn` holds, returning the partner
    fn vacate(&mut self, conn: ConnectionId) -> Option<ConnectionId> {
        let tag = self.tags.remove(&conn)?;
        let room = self.rooms.get_mut(&tag.code)?;

        let partner = if tag.is_host {
            if room.host == Some(conn) {
                room.host = None;
            }
            room.guest
        } else {
            if room.guest == Some(conn) {
                room.guest = None;
            }
            room.host
        };

        if room.is_empty() {
            self.rooms.remove(&tag.code);
            debug!("Room {} removed (empty)", tag.code);
        }

        partner
    }

    fn install(&mut self, code: &str, conn: ConnectionId, is_host: bool) {
        // A connection lives in one room at a time
        if self.tags.contains_key(&conn) {
            self.vacate(conn);
        }
        self.tags.insert(
            conn,
            RoomTag {
                code: code.to_string(),
                is_host,
            },
        );
    }
}

/// In-memory room directory
///
/// Constructed explicitly and shared by `Arc`; every read or write goes
/// through these methods.
#[derive(Default)]
pub struct RoomManager {
    inner: Mutex<Directory>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a fresh code and install `conn` as host
    pub fn create_room(&self, conn: ConnectionId) -> Result<String, SignalError> {
        let mut dir = self.inner.lock();

        let code = loop {
            let candidate = generate_room_code()
                .map_err(|e| SignalError::Transport(format!("RNG failed: {}", e)))?;
            if !dir.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        dir.install(&code, conn, true);
        dir.rooms.insert(code.clone(), Room::new(code.clone(), conn));

        info!("Room created: {} by {}", code, conn);
        Ok(code)
    }

    /// Join the room under `code`, creating it if absent
    ///
    /// A full room is left untouched. A room whose host left is taken
    /// over by the newcomer.
    pub fn join_or_create(
        &self,
        code: &str,
        conn: ConnectionId,
    ) -> Result<JoinOutcome, SignalError> {
        let mut dir = self.inner.lock();

        if let Some(tag) = dir.tags.get(&conn).filter(|t| t.code == code) {
            let is_host = tag.is_host;
            let partner = dir
                .rooms
                .get(code)
                .and_then(|r| if is_host { r.guest } else { r.host });
            return Ok(JoinOutcome {
                is_host,
                has_existing_peer: partner.is_some(),
            });
        }

        let outcome = match dir.rooms.get(code) {
            None => None,
            Some(room) if room.is_full() => return Err(SignalError::RoomFull(code.to_string())),
            Some(room) => Some(room.host.is_none()),
        };

        let outcome = match outcome {
            None => {
                dir.install(code, conn, true);
                dir.rooms
                    .insert(code.to_string(), Room::new(code.to_string(), conn));
                JoinOutcome {
                    is_host: true,
                    has_existing_peer: false,
                }
            }
            Some(promote) => {
                dir.install(code, conn, promote);
                // `install` may have vacated a previous room; the target
                // room still exists because `conn` was not in it.
                let Some(room) = dir.rooms.get_mut(code) else {
                    return Err(SignalError::RoomNotFound(code.to_string()));
                };
                if promote {
                    room.host = Some(conn);
                    JoinOutcome {
                        is_host: true,
                        has_existing_peer: room.guest.is_some(),
                    }
                } else {
                    room.guest = Some(conn);
                    JoinOutcome {
                        is_host: false,
                        has_existing_peer: true,
                    }
                }
            }
        };

        debug!(
            "{} joined room {} as {}",
            conn,
            code,
            if outcome.is_host { "host" } else { "guest" }
        );
        Ok(outcome)
    }

    /// Vacate `conn`'s slot and return the partner left behind
    pub fn leave_room(&self, conn: ConnectionId) -> Option<ConnectionId> {
        self.inner.lock().vacate(conn)
    }

    /// The connection in the opposite slot
    pub fn get_peer(&self, conn: ConnectionId) -> Option<ConnectionId> {
        let dir = self.inner.lock();
        let tag = dir.tags.get(&conn)?;
        let room = dir.rooms.get(&tag.code)?;
        if tag.is_host {
            room.guest
        } else {
            room.host
        }
    }

    /// Room code and role of `conn`, if it is in a room
    pub fn membership(&self, conn: ConnectionId) -> Option<(String, bool)> {
        self.inner
            .lock()
            .tags
            .get(&conn)
            .map(|t| (t.code.clone(), t.is_host))
    }

    pub fn room_status(&self, code: &str) -> RoomStatus {
        match self.inner.lock().rooms.get(code) {
            Some(room) => RoomStatus {
                exists: true,
                is_full: room.is_full(),
            },
            None => RoomStatus::default(),
        }
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    /// Evict rooms older than `max_age`, occupied or not
    pub fn cleanup_stale(&self, max_age: Duration) -> Vec<String> {
        self.cleanup_stale_at(Instant::now(), max_age)
    }

    /// Same as [`cleanup_stale`](Self::cleanup_stale) against a given clock
    pub fn cleanup_stale_at(&self, now: Instant, max_age: Duration) -> Vec<String> {
        let mut dir = self.inner.lock();

        let stale: Vec<String> = dir
            .rooms
            .values()
            .filter(|r| now.saturating_duration_since(r.created_at) > max_age)
            .map(|r| r.code.clone())
            .collect();

        for code in &stale {
            dir.rooms.remove(code);
            info!("Room {} removed (stale)", code);
        }
        if !stale.is_empty() {
            dir.tags.retain(|_, tag| !stale.contains(&tag.code));
            debug!("Evicted {} stale room(s)", stale.len());
        }

        stale
    }
}
