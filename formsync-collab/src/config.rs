use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session configuration.
///
/// Deserializable so a host application can embed it in its own config
/// file; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relay base URL; the document id is appended as a path segment
    pub relay_url: String,
    /// How long `initialize` waits for the relay's state answer
    pub sync_timeout_ms: u64,
    /// Same-user edits closer together than this undo as one step
    pub undo_capture_timeout_ms: u64,
    /// Maximum undo steps kept
    pub undo_depth: usize,
    /// Relay event channel capacity
    pub relay_event_capacity: usize,
    /// Updates kept while the relay is unreachable
    pub offline_queue_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:9090".to_string(),
            sync_timeout_ms: 10_000,
            undo_capture_timeout_ms: 500,
            undo_depth: 100,
            relay_event_capacity: 256,
            offline_queue_limit: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn with_relay_url(mut self, relay_url: impl Into<String>) -> Self {
        self.relay_url = relay_url.into();
        self
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn undo_capture_timeout(&self) -> Duration {
        Duration::from_millis(self.undo_capture_timeout_ms)
    }
}
