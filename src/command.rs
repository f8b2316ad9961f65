//! Inbound command set and outbound status events.
//!
//! Commands arrive as an opaque JSON mapping (`{"action": ...}`) over the
//! HTTP command endpoint or the WebSocket. Unknown actions and malformed
//! payloads parse to `None` and are ignored, never errors.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// All supported device commands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    StreamStart,
    StreamStop,
    StreamToggle,
    Capture,
    RecordStart,
    RecordStop,
    Delete { name: String },
    Setting { param: String, value: i32 },
}

impl Command {
    /// Parse a raw JSON command. `None` for anything unrecognized.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Parse an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// Session lifecycle marker used by status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Started,
    Stopped,
}

/// Events pushed outward to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    RecordingStatus { state: SessionState },
    StreamState { state: SessionState },
    RefreshGallery,
}

/// Broadcast fan-out for status events. Cheap to clone; emitting with no
/// subscribers is fine.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: StatusEvent) {
        // No receivers is not an error; events are fire-and-forget
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(32)
    }
}
