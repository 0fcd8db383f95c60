//! Who else is editing, and where.
//!
//! ## Flow
//!
//! ```text
//! set_current_user / set_focus
//!       │
//!       ▼
//! AwarenessMessage::Announce(PresenceState)
//!       │
//!       ▼   (relay broadcast)
//! Remote PresenceRoom::handle_message()
//!       │
//!       ▼
//! collaborators()  →  SessionEvent::CollaboratorsChanged
//! ```
//!
//! Presence is ephemeral: it never enters the shared document and an entry
//! disappears when its connection leaves the relay.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::protocol::ProtocolError;

/// Colors handed to collaborators that did not pick one.
pub const PALETTE: [&str; 10] = [
    "#F87171", "#FB923C", "#FBBF24", "#34D399", "#22D3EE",
    "#60A5FA", "#818CF8", "#A78BFA", "#F472B6", "#94A3B8",
];

/// Stable palette color for an identity.
///
/// 32-bit `h = c + (h << 5) - h` over UTF-16 code units, so every client
/// implementation picks the same color for the same user.
pub fn color_for(identity: &str) -> &'static str {
    let hash = identity.encode_utf16().fold(0i32, |hash, unit| {
        i32::from(unit).wrapping_add(hash.wrapping_shl(5)).wrapping_sub(hash)
    });
    PALETTE[hash.unsigned_abs() as usize % PALETTE.len()]
}

/// What a client publishes about its user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub color: Option<String>,
    pub current_page_id: Option<String>,
    pub current_field_id: Option<String>,
}

impl PresenceState {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: None,
            color: None,
            current_page_id: None,
            current_field_id: None,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_focus(mut self, page_id: Option<String>, field_id: Option<String>) -> Self {
        self.current_page_id = page_id;
        self.current_field_id = field_id;
        self
    }
}

/// Payload of `MessageType::Awareness` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AwarenessMessage {
    /// Full current state; replaces whatever the sender published before.
    Announce(PresenceState),
    /// Clean departure.
    Leave { user_id: String },
}

impl AwarenessMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    pub fn user_id(&self) -> &str {
        match self {
            AwarenessMessage::Announce(state) => &state.user_id,
            AwarenessMessage::Leave { user_id } => user_id,
        }
    }
}

/// A remote editor as the application sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub color: String,
    pub current_page_id: Option<String>,
    pub current_field_id: Option<String>,
}

impl From<&PresenceState> for Collaborator {
    fn from(state: &PresenceState) -> Self {
        Self {
            id: state.user_id.clone(),
            name: state.name.clone(),
            email: state.email.clone(),
            color: state
                .color
                .clone()
                .unwrap_or_else(|| color_for(&state.user_id).to_string()),
            current_page_id: state.current_page_id.clone(),
            current_field_id: state.current_field_id.clone(),
        }
    }
}

/// Presence of every remote connection on one document.
#[derive(Debug, Default)]
pub struct PresenceRoom {
    local_user_id: Option<String>,
    /// Keyed by relay connection, so two tabs of one user are two entries.
    peers: BTreeMap<Uuid, PresenceState>,
}

impl PresenceRoom {
    pub fn new(local_user_id: Option<String>) -> Self {
        Self {
            local_user_id,
            peers: BTreeMap::new(),
        }
    }

    /// Change who "we" are; entries for the new identity are dropped.
    pub fn set_local_user(&mut self, user_id: Option<String>) {
        if let Some(id) = &user_id {
            self.peers.retain(|_, state| &state.user_id != id);
        }
        self.local_user_id = user_id;
    }

    fn is_local(&self, user_id: &str) -> bool {
        self.local_user_id.as_deref() == Some(user_id)
    }

    /// Apply a message from connection `peer_id`. Returns whether the
    /// collaborator list changed.
    pub fn handle_message(&mut self, peer_id: Uuid, message: &AwarenessMessage) -> bool {
        if self.is_local(message.user_id()) {
            return false;
        }
        match message {
            AwarenessMessage::Announce(state) => {
                if self.peers.get(&peer_id) == Some(state) {
                    return false;
                }
                self.peers.insert(peer_id, state.clone());
                true
            }
            AwarenessMessage::Leave { user_id } => {
                match self.peers.get(&peer_id) {
                    Some(state) if &state.user_id == user_id => {
                        self.peers.remove(&peer_id);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Forget a connection that left the relay.
    pub fn remove_peer(&mut self, peer_id: Uuid) -> bool {
        self.peers.remove(&peer_id).is_some()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// One entry per remote user, sorted by (name, id).
    pub fn collaborators(&self) -> Vec<Collaborator> {
        let mut seen = BTreeSet::new();
        let mut collaborators: Vec<Collaborator> = self
            .peers
            .values()
            .filter(|state| seen.insert(state.user_id.clone()))
            .map(Collaborator::from)
            .collect();
        collaborators.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));
        collaborators
    }
}
