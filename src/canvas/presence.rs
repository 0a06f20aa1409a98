//! Presence tracker: ephemeral per-connection cursor and tool state.
//!
//! DESIGN
//! ======
//! Presence lives beside the object store, never inside it: no history, no
//! persistence. The local record is overwritten field by field through
//! `set_presence` and published at most once per render frame via
//! `take_update`, so a stream of pointer moves costs one channel message per
//! frame instead of one per event.
//!
//! Peer records are overwritten wholesale. Each outbound update carries a
//! per-connection sequence number; receivers drop anything not newer than
//! the last sequence seen from that connection, which gives per-peer
//! monotonic delivery even if a stale update is replayed. No ordering is
//! promised across peers.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::frame::{self, Data, Frame, FrameError};

pub const DEFAULT_PRESENCE_FRAME_MS: u64 = 16;

// =============================================================================
// TYPES
// =============================================================================

/// Cursor position in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One connection's presence record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// `None` when the pointer has left the canvas.
    #[serde(default)]
    pub cursor: Option<Point>,
    #[serde(default)]
    pub tool: Option<String>,
}

/// Partial presence update. Outer `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresencePatch {
    pub cursor: Option<Option<Point>>,
    pub tool: Option<Option<String>>,
}

impl PresencePatch {
    #[must_use]
    pub fn cursor(point: Option<Point>) -> Self {
        Self { cursor: Some(point), ..Self::default() }
    }

    #[must_use]
    pub fn tool(tool: impl Into<String>) -> Self {
        Self { tool: Some(Some(tool.into())), ..Self::default() }
    }
}

/// Wire form of a presence broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub connection_id: String,
    pub seq: u64,
    pub presence: Presence,
}

/// Current presence of every known peer, keyed by connection id.
pub type PeerMap = HashMap<String, Presence>;

impl PresenceUpdate {
    /// Encode as a `presence:update` frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Payload` if the record cannot be serialized.
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let mut data = Data::new();
        data.insert(frame::CONNECTION_ID.into(), serde_json::json!(self.connection_id));
        data.insert("seq".into(), serde_json::json!(self.seq));
        data.insert("presence".into(), serde_json::to_value(&self.presence)?);
        Ok(Frame::request(frame::PRESENCE_UPDATE, data))
    }

    /// Decode a `presence:update` frame. The relay-stamped `from` wins over
    /// the self-declared connection id.
    ///
    /// # Errors
    ///
    /// `MissingField` when `seq` or the connection id is absent, `Payload`
    /// when `presence` is malformed.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let connection_id = frame
            .from
            .as_deref()
            .or_else(|| frame.str_field(frame::CONNECTION_ID))
            .ok_or_else(|| FrameError::MissingField("connection_id", frame.syscall.clone()))?
            .to_owned();
        let seq = frame
            .data
            .get("seq")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| FrameError::MissingField("seq", frame.syscall.clone()))?;
        let presence = match frame.data.get("presence") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Presence::default(),
        };
        Ok(Self { connection_id, seq, presence })
    }
}

/// Build the `presence:left` notice the relay sends when a connection drops.
#[must_use]
pub fn left_frame(connection_id: &str) -> Frame {
    Frame::request(frame::PRESENCE_LEFT, Data::new()).with_data(frame::CONNECTION_ID, connection_id)
}

// =============================================================================
// TRACKER
// =============================================================================

pub struct PresenceTracker {
    connection_id: String,
    local: Presence,
    pending: bool,
    seq: u64,
    frame_interval_ms: i64,
    last_sent_ms: Option<i64>,
    peers: PeerMap,
    last_seq: HashMap<String, u64>,
    peers_tx: watch::Sender<PeerMap>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(frame_interval: Duration) -> Self {
        let (peers_tx, _) = watch::channel(PeerMap::new());
        Self {
            connection_id: String::new(),
            local: Presence::default(),
            pending: false,
            seq: 0,
            frame_interval_ms: i64::try_from(frame_interval.as_millis()).unwrap_or(i64::MAX),
            last_sent_ms: None,
            peers: PeerMap::new(),
            last_seq: HashMap::new(),
            peers_tx,
        }
    }

    /// Adopt the relay-assigned connection id (from `session:connected`).
    pub fn set_connection_id(&mut self, connection_id: impl Into<String>) {
        self.connection_id = connection_id.into();
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn local(&self) -> &Presence {
        &self.local
    }

    /// Replace the given fields of our own presence and mark it for broadcast.
    pub fn set_presence(&mut self, patch: PresencePatch) {
        let mut next = self.local.clone();
        if let Some(cursor) = patch.cursor {
            next.cursor = cursor;
        }
        if let Some(tool) = patch.tool {
            next.tool = tool;
        }
        if next != self.local {
            self.local = next;
            self.pending = true;
        }
    }

    /// Yield the coalesced update if one is pending and a frame interval has
    /// elapsed since the last one.
    pub fn take_update(&mut self, now_ms: i64) -> Option<PresenceUpdate> {
        if !self.pending {
            return None;
        }
        if let Some(last) = self.last_sent_ms {
            if now_ms - last < self.frame_interval_ms {
                return None;
            }
        }

        self.pending = false;
        self.last_sent_ms = Some(now_ms);
        self.seq += 1;
        Some(PresenceUpdate { connection_id: self.connection_id.clone(), seq: self.seq, presence: self.local.clone() })
    }

    /// When the pending update may go out, if any.
    #[must_use]
    pub fn next_update_at(&self) -> Option<i64> {
        if !self.pending {
            return None;
        }
        Some(self.last_sent_ms.map_or(i64::MIN, |last| last + self.frame_interval_ms))
    }

    /// Apply a peer's update. Returns `false` for stale or self-addressed updates.
    pub fn apply_peer(&mut self, update: PresenceUpdate) -> bool {
        if update.connection_id == self.connection_id {
            return false;
        }
        if let Some(&seen) = self.last_seq.get(&update.connection_id) {
            if update.seq <= seen {
                debug!(connection_id = %update.connection_id, seq = update.seq, seen, "stale presence dropped");
                return false;
            }
        }

        self.last_seq.insert(update.connection_id.clone(), update.seq);
        self.peers.insert(update.connection_id, update.presence);
        self.publish();
        true
    }

    /// Forget a peer that left the room.
    pub fn remove_peer(&mut self, connection_id: &str) -> bool {
        self.last_seq.remove(connection_id);
        let removed = self.peers.remove(connection_id).is_some();
        if removed {
            self.publish();
        }
        removed
    }

    /// Drop every peer (room change). Our own sequence keeps counting.
    pub fn clear_peers(&mut self) {
        self.last_seq.clear();
        if !self.peers.is_empty() {
            self.peers.clear();
            self.publish();
        }
    }

    #[must_use]
    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    /// Observe the peer set. The receiver always sees the latest map.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PeerMap> {
        self.peers_tx.subscribe()
    }

    fn publish(&self) {
        self.peers_tx.send_replace(self.peers.clone());
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_PRESENCE_FRAME_MS))
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
