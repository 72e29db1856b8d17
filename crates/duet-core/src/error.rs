//! Error types for the Duet signaling protocol

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signaling errors
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("room code is required")]
    MissingRoomCode,

    #[error("relay target unavailable: {0}")]
    RelayTargetUnavailable(String),

    #[error("{0} is not available in this mode")]
    UnsupportedInMode(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SignalError {
    fn from(e: serde_json::Error) -> Self {
        SignalError::MalformedMessage(e.to_string())
    }
}

impl SignalError {
    /// Whether the originating browser should be told about this error.
    ///
    /// Everything else is logged and dropped.
    pub fn is_client_visible(&self) -> bool {
        matches!(
            self,
            SignalError::RoomNotFound(_)
                | SignalError::RoomFull(_)
                | SignalError::MissingRoomCode
                | SignalError::UnsupportedInMode(_)
        )
    }

    /// Human-readable text for the `error` field of an error message
    pub fn client_text(&self) -> String {
        match self {
            SignalError::RoomFull(_) => "Room is full".into(),
            SignalError::MissingRoomCode => "Room code is required".into(),
            SignalError::RoomNotFound(_) => "Room not found".into(),
            other => other.to_string(),
        }
    }
}

/// Wire error codes (sent to browsers)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedMessage,
    RoomNotFound,
    RoomFull,
    MissingRoomCode,
    RelayTargetUnavailable,
    UnsupportedInMode,
    InternalError,
}

impl From<&SignalError> for ErrorCode {
    fn from(e: &SignalError) -> Self {
        match e {
            SignalError::MalformedMessage(_) => ErrorCode::MalformedMessage,
            SignalError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            SignalError::RoomFull(_) => ErrorCode::RoomFull,
            SignalError::MissingRoomCode => ErrorCode::MissingRoomCode,
            SignalError::RelayTargetUnavailable(_) => ErrorCode::RelayTargetUnavailable,
            SignalError::UnsupportedInMode(_) => ErrorCode::UnsupportedInMode,
            SignalError::Transport(_) | SignalError::Io(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_visibility() {
        assert!(SignalError::RoomFull("AB12CD".into()).is_client_visible());
        assert!(SignalError::MissingRoomCode.is_client_visible());
        assert!(!SignalError::RelayTargetUnavailable("abc".into()).is_client_visible());
        assert!(!SignalError::MalformedMessage("eof".into()).is_client_visible());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = SignalError::RoomFull("AB12CD".into());
        assert_eq!(ErrorCode::from(&err), ErrorCode::RoomFull);
        assert_eq!(err.client_text(), "Room is full");

        let json = serde_json::to_string(&ErrorCode::MissingRoomCode).unwrap();
        assert_eq!(json, "\"missing_room_code\"");
    }
}
