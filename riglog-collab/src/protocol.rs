//! Binary protocol between editors and the ledger.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────────────────────┐
//! │ msg_type │ peer_id   │ seq      │ payload                  │
//! │ 1 byte   │ 16 bytes  │ varint   │ JSON envelope / bincode  │
//! └──────────┴───────────┴──────────┴──────────────────────────┘
//! ```
//!
//! `seq` is the request id on Submit/Fetch and their replies, and the
//! ledger version on StateInit/StateUpdate pushes.  Envelope payloads are
//! the persisted document JSON and are normalized again on receipt.

use riglog_core::StateEnvelope;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Editor introduces itself
    Hello = 1,
    /// Full snapshot sent to a newly connected editor
    StateInit = 2,
    /// Snapshot pushed after every accepted write
    StateUpdate = 3,
    /// Candidate envelope for the ledger
    Submit = 4,
    /// Accepted write, carries the authoritative envelope
    Ack = 5,
    /// Submit could not be read, payload is the reason
    Rejected = 6,
    /// Read request
    Fetch = 7,
    /// Read reply
    Snapshot = 8,
    /// Heartbeat ping
    Ping = 9,
    /// Heartbeat pong
    Pong = 10,
}

impl MessageType {
    /// Whether this message answers a client request.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Ack | Self::Rejected | Self::Snapshot)
    }
}

/// Editor identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditorInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl EditorInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
        }
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub seq: u64,
    pub payload: Vec<u8>,
}

fn envelope_json(envelope: &StateEnvelope) -> Result<Vec<u8>, ProtocolError> {
    envelope
        .to_json()
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

impl SyncMessage {
    fn with_envelope(
        msg_type: MessageType,
        peer_id: Uuid,
        seq: u64,
        envelope: &StateEnvelope,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type,
            peer_id,
            seq,
            payload: envelope_json(envelope)?,
        })
    }

    pub fn hello(info: &EditorInfo) -> Self {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::Hello,
            peer_id: info.peer_id,
            seq: 0,
            payload,
        }
    }

    /// Initial snapshot for a new connection.
    pub fn state_init(peer_id: Uuid, envelope: &StateEnvelope) -> Result<Self, ProtocolError> {
        Self::with_envelope(MessageType::StateInit, peer_id, envelope.version, envelope)
    }

    /// Push after an accepted write.
    pub fn state_update(peer_id: Uuid, envelope: &StateEnvelope) -> Result<Self, ProtocolError> {
        Self::with_envelope(MessageType::StateUpdate, peer_id, envelope.version, envelope)
    }

    pub fn submit(
        peer_id: Uuid,
        request: u64,
        candidate: &StateEnvelope,
    ) -> Result<Self, ProtocolError> {
        Self::with_envelope(MessageType::Submit, peer_id, request, candidate)
    }

    pub fn ack(peer_id: Uuid, request: u64, accepted: &StateEnvelope) -> Result<Self, ProtocolError> {
        Self::with_envelope(MessageType::Ack, peer_id, request, accepted)
    }

    pub fn rejected(peer_id: Uuid, request: u64, reason: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Rejected,
            peer_id,
            seq: request,
            payload: reason.into().into_bytes(),
        }
    }

    pub fn fetch(peer_id: Uuid, request: u64) -> Self {
        Self {
            msg_type: MessageType::Fetch,
            peer_id,
            seq: request,
            payload: Vec::new(),
        }
    }

    pub fn snapshot(peer_id: Uuid, request: u64, current: &StateEnvelope) -> Result<Self, ProtocolError> {
        Self::with_envelope(MessageType::Snapshot, peer_id, request, current)
    }

    pub fn ping(peer_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Ping,
            peer_id,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn pong(peer_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Pong,
            peer_id,
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Raw JSON payload of a Submit, not yet normalized.
    pub fn candidate(&self) -> Result<serde_json::Value, ProtocolError> {
        if self.msg_type != MessageType::Submit {
            return Err(ProtocolError::InvalidMessageType);
        }
        serde_json::from_slice(&self.payload).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }

    /// Normalized envelope carried by a StateInit, StateUpdate, Ack or
    /// Snapshot.
    pub fn envelope(&self) -> Result<StateEnvelope, ProtocolError> {
        match self.msg_type {
            MessageType::StateInit
            | MessageType::StateUpdate
            | MessageType::Ack
            | MessageType::Snapshot => StateEnvelope::from_json(&self.payload, self.seq)
                .map_err(|e| ProtocolError::InvalidPayload(e.to_string())),
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    /// Reason text of a Rejected reply.
    pub fn reason(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::Rejected {
            return Err(ProtocolError::InvalidMessageType);
        }
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }

    /// Parse editor info payload.
    pub fn editor_info(&self) -> Result<EditorInfo, ProtocolError> {
        if self.msg_type != MessageType::Hello {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (info, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(info)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    InvalidPayload(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::InvalidPayload(e) => write!(f, "Invalid payload: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_envelope(version: u64) -> StateEnvelope {
        StateEnvelope::with_default_decks(version, Utc::now())
    }

    #[test]
    fn test_state_update_carries_version() {
        let peer = Uuid::new_v4();
        let envelope = sample_envelope(12);

        let msg = SyncMessage::state_update(peer, &envelope).unwrap();
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::StateUpdate);
        assert_eq!(decoded.peer_id, peer);
        assert_eq!(decoded.seq, 12);
        assert_eq!(decoded.envelope().unwrap(), envelope);
    }

    #[test]
    fn test_submit_candidate_is_raw_json() {
        let msg = SyncMessage::submit(Uuid::new_v4(), 3, &sample_envelope(99)).unwrap();
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.seq, 3);
        let candidate = decoded.candidate().unwrap();
        assert_eq!(candidate["version"], 99);
        assert_eq!(candidate["decks"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_submit_with_garbage_payload() {
        let msg = SyncMessage {
            msg_type: MessageType::Submit,
            peer_id: Uuid::new_v4(),
            seq: 1,
            payload: b"not json".to_vec(),
        };
        assert!(matches!(msg.candidate(), Err(ProtocolError::InvalidPayload(_))));
    }

    #[test]
    fn test_envelope_payload_is_normalized() {
        let msg = SyncMessage {
            msg_type: MessageType::Snapshot,
            peer_id: Uuid::new_v4(),
            seq: 4,
            payload: br#"{"decks":[{"name":"Pipe deck","layout":[{"width":"abc"}]}]}"#.to_vec(),
        };
        let envelope = msg.envelope().unwrap();
        assert_eq!(envelope.version, 4);
        assert_eq!(envelope.decks[0].name, "Pipe deck");
        let item = envelope.decks[0].items().next().unwrap();
        assert_eq!(item.base.width, riglog_core::model::DEFAULT_WIDTH_M);
    }

    #[test]
    fn test_rejected_reason() {
        let msg = SyncMessage::rejected(Uuid::new_v4(), 8, "payload is not JSON");
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.seq, 8);
        assert!(decoded.msg_type.is_reply());
        assert_eq!(decoded.reason().unwrap(), "payload is not JSON");
    }

    #[test]
    fn test_hello_roundtrip() {
        let info = EditorInfo::new("Deck planner");
        let decoded = SyncMessage::decode(&SyncMessage::hello(&info).encode().unwrap()).unwrap();
        assert_eq!(decoded.editor_info().unwrap(), info);
    }

    #[test]
    fn test_payload_accessors_check_type() {
        let msg = SyncMessage::ping(Uuid::new_v4());
        assert_eq!(msg.envelope(), Err(ProtocolError::InvalidMessageType));
        assert_eq!(msg.candidate(), Err(ProtocolError::InvalidMessageType));
        assert_eq!(msg.reason(), Err(ProtocolError::InvalidMessageType));
        assert!(msg.editor_info().is_err());
        assert!(!msg.msg_type.is_reply());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(SyncMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Hello as u8, 1);
        assert_eq!(MessageType::Submit as u8, 4);
        assert_eq!(MessageType::Pong as u8, 10);
    }
}
