//! Room codes and instance identifiers
//!
//! Provides:
//! - Room code generation, normalization and validation
//! - Random peer IDs for server instances and connections

/// Length of a room code in characters
pub const ROOM_CODE_LENGTH: usize = 6;

/// Characters used in room codes
const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random room code (e.g., "AB12CD")
///
/// Uniqueness against live rooms is the caller's job, see
/// `RoomManager::create_room`.
pub fn generate_room_code() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; ROOM_CODE_LENGTH];
    getrandom::getrandom(&mut bytes)?;

    Ok(bytes
        .iter()
        .map(|b| ROOM_CODE_CHARS[(*b as usize) % ROOM_CODE_CHARS.len()] as char)
        .collect())
}

/// Normalize a room code (trim, uppercase)
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Check that a code has the generated shape: six `[A-Z0-9]` characters
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LENGTH && code.bytes().all(|b| ROOM_CODE_CHARS.contains(&b))
}

/// Generate a random peer ID (16 hex chars)
pub fn generate_peer_id() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes)?;
    Ok(hex::encode(bytes))
}
