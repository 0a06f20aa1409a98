//! Frame: envelope for everything on a room's sync channel.
//!
//! ARCHITECTURE
//! ============
//! Store mutations (`object:*`), presence (`presence:*`), and relay notices
//! (`session:*`) all travel as Frames. The relay routes on the syscall
//! prefix and never decodes `data`; replicas decode `data` into typed
//! mutations and presence records.
//!
//! DESIGN
//! ======
//! - `data` is one flat JSON object; typed payloads live under named keys.
//! - `from` and `room_id` are authoritative only once the relay stamps them.
//! - A rejection is an `Error` frame whose `parent_id` names the offending frame.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Error frame key: human-readable message.
pub const FRAME_MESSAGE: &str = "message";

/// Error frame key: stable `E_*` code.
pub const FRAME_CODE: &str = "code";

/// Error frame key: whether resending may succeed.
pub const FRAME_RETRYABLE: &str = "retryable";

/// Data key carrying the relay-assigned connection id.
pub const CONNECTION_ID: &str = "connection_id";

// =============================================================================
// SYSCALLS
// =============================================================================

pub const OBJECT_ADD: &str = "object:add";
pub const OBJECT_REMOVE: &str = "object:remove";
pub const OBJECT_SET: &str = "object:set";
pub const PRESENCE_UPDATE: &str = "presence:update";
pub const PRESENCE_LEFT: &str = "presence:left";
pub const SESSION_CONNECTED: &str = "session:connected";

// =============================================================================
// TYPES
// =============================================================================

pub type Data = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// A mutation, presence update, or notice.
    Request,
    /// A rejection sent back to the originator only.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch at construction.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// A frame whose payload does not match its syscall.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("missing field `{0}` in {1} frame")]
    MissingField(&'static str, String),
    #[error("unsupported syscall: {0}")]
    UnknownSyscall(String),
    #[error("invalid frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ErrorCode for FrameError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(..) => "E_FRAME_MISSING_FIELD",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
            Self::Payload(_) => "E_SERIALIZATION",
        }
    }
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Stable code plus retry hint, implemented by every module's error enum.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

fn now_ms() -> i64 {
    let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(elapsed.as_millis()).unwrap_or(0)
}

impl Frame {
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            room_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Reject this frame with a typed error. Keeps the syscall and room so
    /// the sender can match the rejection to what it sent.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), Value::from(err.error_code()));
        data.insert(FRAME_MESSAGE.into(), Value::from(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), Value::from(err.retryable()));
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            room_id: self.room_id.clone(),
            from: None,
            syscall: self.syscall.clone(),
            status: Status::Error,
            data,
        }
    }

    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Syscall namespace: `"object"` for `"object:set"`. A syscall without a
    /// `:` is its own prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
