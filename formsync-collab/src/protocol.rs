//! Binary frames exchanged with the relay.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ doc_id   │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes  │ string   │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Document payloads are opaque `yrs` v1 updates or state vectors; the
//! relay forwards them without looking inside.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::presence::AwarenessMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// State vector asking the relay for everything we lack
    SyncStep1 = 1,
    /// The relay's answer to `SyncStep1`
    SyncStep2 = 2,
    /// Incremental document update
    Delta = 3,
    /// Presence announcement or departure
    Awareness = 4,
    PeerJoined = 5,
    PeerLeft = 6,
    Ping = 7,
    Pong = 8,
}

/// Connection-level identity, one per relay connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub doc_id: String,
    /// Per-connection send counter
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, doc_id: &str, clock: u64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            doc_id: doc_id.to_string(),
            clock,
            payload,
        }
    }

    pub fn delta(peer_id: Uuid, doc_id: &str, clock: u64, update: Vec<u8>) -> Self {
        Self::new(MessageType::Delta, peer_id, doc_id, clock, update)
    }

    pub fn sync_step1(peer_id: Uuid, doc_id: &str, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, peer_id, doc_id, 0, state_vector)
    }

    pub fn sync_step2(peer_id: Uuid, doc_id: &str, update: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, peer_id, doc_id, 0, update)
    }

    pub fn awareness(
        peer_id: Uuid,
        doc_id: &str,
        clock: u64,
        message: &AwarenessMessage,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(MessageType::Awareness, peer_id, doc_id, clock, message.encode()?))
    }

    pub fn peer_joined(doc_id: &str, info: &PeerInfo) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self::new(MessageType::PeerJoined, info.peer_id, doc_id, 0, payload))
    }

    pub fn peer_left(peer_id: Uuid, doc_id: &str) -> Self {
        Self::new(MessageType::PeerLeft, peer_id, doc_id, 0, Vec::new())
    }

    pub fn ping(peer_id: Uuid, doc_id: &str) -> Self {
        Self::new(MessageType::Ping, peer_id, doc_id, 0, Vec::new())
    }

    pub fn pong(peer_id: Uuid, doc_id: &str) -> Self {
        Self::new(MessageType::Pong, peer_id, doc_id, 0, Vec::new())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    pub fn awareness_message(&self) -> Result<AwarenessMessage, ProtocolError> {
        if self.msg_type != MessageType::Awareness {
            return Err(ProtocolError::InvalidMessageType);
        }
        AwarenessMessage::decode(&self.payload)
    }

    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.msg_type != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (info, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(info)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("invalid message type")]
    InvalidMessageType,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connect failed: {0}")]
    Handshake(String),
    #[error("offline queue full")]
    QueueFull,
}
