//! Signal protocol messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use duet_core::{ErrorCode, SignalError};

/// Messages sent over the signaling WebSocket
///
/// Browser and peer links share one JSON vocabulary, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Browser asks for a fresh room
    CreateRoom,

    /// Room created, browser is host
    RoomCreated { code: String },

    /// Browser joins (or re-creates) a room by code
    JoinRoom(RoomCodeRequest),

    /// Browser joined a room
    #[serde(rename_all = "camelCase")]
    RoomJoined { code: String, is_host: bool },

    /// Browser asks whether a room exists
    CheckRoom(RoomCodeRequest),

    /// Answer to `check-room`
    #[serde(rename_all = "camelCase")]
    RoomStatus { exists: bool, is_full: bool },

    /// WebRTC offer
    Offer(SignalPayload),

    /// WebRTC answer
    Answer(SignalPayload),

    /// Trickled ICE candidate
    IceCandidate(SignalPayload),

    /// A counterpart became available
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },

    /// A counterpart went away
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
    },

    /// Currently discovered instances
    PeerList { peers: Vec<PeerSummary> },

    /// Error response
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },

    /// Any `type` this server does not know
    #[serde(other)]
    Unknown,
}

/// Room code carried either as `{code}` or `{data: {code}}`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomCodeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RoomCodeData>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomCodeData {
    #[serde(default)]
    pub code: Option<String>,
}

impl RoomCodeRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            data: None,
        }
    }

    /// The requested code, whichever form it came in
    pub fn code(&self) -> Option<&str> {
        self.code
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.code.as_deref()))
            .filter(|c| !c.trim().is_empty())
    }
}

/// Opaque offer/answer/candidate payload
///
/// `data` is never inspected by the server.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Discovered instance as shown to browsers (no HTTP port)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub address: String,
}

/// The three relayable handshake kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalMessage {
    /// Create an error message from a signaling error
    pub fn error(err: &SignalError) -> Self {
        Self::Error {
            error: err.client_text(),
            code: Some(ErrorCode::from(err)),
        }
    }

    /// Build a relayable message of the given kind
    pub fn signal(kind: SignalKind, payload: SignalPayload) -> Self {
        match kind {
            SignalKind::Offer => Self::Offer(payload),
            SignalKind::Answer => Self::Answer(payload),
            SignalKind::IceCandidate => Self::IceCandidate(payload),
        }
    }

    /// Split a relayable message into its kind and payload
    pub fn into_signal(self) -> Option<(SignalKind, SignalPayload)> {
        match self {
            Self::Offer(p) => Some((SignalKind::Offer, p)),
            Self::Answer(p) => Some((SignalKind::Answer, p)),
            Self::IceCandidate(p) => Some((SignalKind::IceCandidate, p)),
            _ => None,
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SignalError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_messages_wire_format() {
        let json = SignalMessage::RoomCreated {
            code: "AB12CD".into(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"room-created","code":"AB12CD"}"#);

        let json = SignalMessage::RoomJoined {
            code: "AB12CD".into(),
            is_host: false,
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""type":"room-joined""#));
        assert!(json.contains(r#""isHost":false"#));

        let json = SignalMessage::RoomStatus {
            exists: false,
            is_full: false,
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""isFull":false"#));
    }

    #[test]
    fn test_bare_peer_events() {
        let joined = SignalMessage::PeerJoined {
            peer_id: None,
            address: None,
        };
        assert_eq!(joined.to_json().unwrap(), r#"{"type":"peer-joined"}"#);

        let left = SignalMessage::PeerLeft { peer_id: None };
        assert_eq!(left.to_json().unwrap(), r#"{"type":"peer-left"}"#);
    }

    #[test]
    fn test_join_room_code_forms() {
        let flat = SignalMessage::from_json(r#"{"type":"join-room","code":"ab12cd"}"#).unwrap();
        let nested =
            SignalMessage::from_json(r#"{"type":"join-room","data":{"code":"AB12CD"}}"#).unwrap();
        let missing = SignalMessage::from_json(r#"{"type":"join-room"}"#).unwrap();

        match (flat, nested, missing) {
            (
                SignalMessage::JoinRoom(a),
                SignalMessage::JoinRoom(b),
                SignalMessage::JoinRoom(c),
            ) => {
                assert_eq!(a.code(), Some("ab12cd"));
                assert_eq!(b.code(), Some("AB12CD"));
                assert_eq!(c.code(), None);
            }
            other => panic!("wrong message types: {:?}", other),
        }
    }

    #[test]
    fn test_signal_payload_is_opaque() {
        let raw = json!({
            "type": "ice-candidate",
            "targetPeerId": "abcd",
            "data": {"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host", "sdpMid": "0"}
        });
        let msg: SignalMessage = serde_json::from_value(raw.clone()).unwrap();
        let (kind, payload) = msg.into_signal().unwrap();
        assert_eq!(kind, SignalKind::IceCandidate);
        assert_eq!(payload.target_peer_id.as_deref(), Some("abcd"));
        assert_eq!(payload.data, raw.get("data").cloned());
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = SignalMessage::from_json(r#"{"type":"typing","who":"me"}"#).unwrap();
        assert_eq!(msg, SignalMessage::Unknown);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            SignalMessage::from_json("{not json"),
            Err(SignalError::MalformedMessage(_))
        ));
        assert!(SignalMessage::from_json(r#"{"code":"AB12CD"}"#).is_err());
    }

    #[test]
    fn test_error_message() {
        let msg = SignalMessage::error(&SignalError::RoomFull("AB12CD".into()));
        let json = msg.to_json().unwrap();

        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("Room is full"));
        assert!(json.contains("room_full"));
    }
}
