//! # formsync-collab — Real-time co-editing of form schemas
//!
//! Connects a [`formsync_core::FormDocument`] to a relay over WebSocket and
//! turns every edit into one origin-tagged transaction that all replicas
//! converge on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  mutations   ┌──────────────┐   Binary Proto   ┌─────────────┐
//! │ Application  │ ───────────► │ FormSession  │ ◄──────────────► │ Relay       │
//! │ (editor UI)  │ ◄─────────── │              │    WebSocket     │ (external)  │
//! └──────────────┘ SessionEvent └──────┬───────┘                  └─────────────┘
//!                                      │
//!                     ┌────────────────┼────────────────┐
//!                     ▼                ▼                ▼
//!              ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//!              │ ObserverTree│  │ UndoHistory │  │ PresenceRoom│
//!              │ (ChangeSet) │  │ (per origin)│  │ (awareness) │
//!              └─────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded SyncMessage)
//! - [`relay`] — WebSocket relay client with offline queue
//! - [`presence`] — Collaborator awareness and colors
//! - [`observers`] — Change marks and observer lifecycle
//! - [`mutations`] — Reversible document edits and their planners
//! - [`undo`] — Per-user undo/redo over recorded edits
//! - [`session`] — The engine tying the above together

pub mod config;
pub mod error;
pub mod mutations;
pub mod observers;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod undo;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use mutations::{Edit, Plan, PlanResult, Skip};
pub use observers::{ChangeSet, Marks, ObserverTree};
pub use presence::{color_for, AwarenessMessage, Collaborator, PresenceRoom, PresenceState, PALETTE};
pub use protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
pub use relay::{ConnectionState, OfflineQueue, RelayClient, RelayEvent};
pub use session::{FormSession, LocalUser, SessionEvent, REMOTE_ORIGIN};
pub use undo::{UndoHistory, UndoStep};
