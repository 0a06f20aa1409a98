//! Persistence bridge: debounced snapshots of a replica to the durable record.
//!
//! DESIGN
//! ======
//! The bridge observes store mutations (via `schedule_save`) and writes the
//! whole converged snapshot with `upsert_board_data`. Bursts are coalesced by
//! a trailing-edge debounce: the save fires after `debounce` of quiet, or
//! after `max_wait` since the first unsaved edit, whichever comes first, so
//! a continuous drag still bounds the data-loss window.
//!
//! The bridge never owns a timer. Callers ask for `save_deadline()`, sleep
//! until it, and call `save_if_due(now)`. This keeps it usable from a
//! `select!` loop and deterministic under test.
//!
//! ERROR HANDLING
//! ==============
//! A write is attempted `retries` times with linear back-off. When every
//! attempt fails the dirty flag is kept and `SaveFailed` is returned; the
//! in-memory store stays authoritative and the caller may `flush_save` again.
//! There is no write-ahead log.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::canvas::store::{CanvasObjectStore, StoreError};
use crate::config::env_parse;
use crate::db::{BoardRecordStore, RecordError};
use crate::frame::ErrorCode;

const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_SAVE_MAX_WAIT_MS: u64 = 5000;
const DEFAULT_SAVE_RETRIES: usize = 2;
const DEFAULT_SAVE_RETRY_BASE_MS: u64 = 50;

// =============================================================================
// CONFIG
// =============================================================================

/// Save tuning knobs, loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Quiet period before a scheduled save fires.
    pub debounce: Duration,
    /// Upper bound between the first unsaved edit and its save.
    pub max_wait: Duration,
    /// Write attempts per save.
    pub retries: usize,
    /// Base delay for linear retry back-off.
    pub retry_base: Duration,
}

impl PersistenceConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            debounce: Duration::from_millis(env_parse("SAVE_DEBOUNCE_MS", DEFAULT_SAVE_DEBOUNCE_MS)),
            max_wait: Duration::from_millis(env_parse("SAVE_MAX_WAIT_MS", DEFAULT_SAVE_MAX_WAIT_MS)),
            retries: env_parse("SAVE_RETRIES", DEFAULT_SAVE_RETRIES),
            retry_base: Duration::from_millis(env_parse("SAVE_RETRY_BASE_MS", DEFAULT_SAVE_RETRY_BASE_MS)),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            max_wait: Duration::from_millis(DEFAULT_SAVE_MAX_WAIT_MS),
            retries: DEFAULT_SAVE_RETRIES,
            retry_base: Duration::from_millis(DEFAULT_SAVE_RETRY_BASE_MS),
        }
    }
}

// =============================================================================
// DEBOUNCER
// =============================================================================

/// Trailing-edge debounce with a max-wait cap.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    max_wait: Duration,
    first: Option<Instant>,
    last: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new(quiet: Duration, max_wait: Duration) -> Self {
        Self { quiet, max_wait: max_wait.max(quiet), first: None, last: None }
    }

    /// Record a triggering event. Pushes the quiet deadline out.
    pub fn trigger(&mut self, now: Instant) {
        self.first.get_or_insert(now);
        self.last = Some(now);
    }

    /// When the pending effect should run, if one is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let (first, last) = (self.first?, self.last?);
        Some((last + self.quiet).min(first + self.max_wait))
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.first.is_some()
    }

    pub fn reset(&mut self) {
        self.first = None;
        self.last = None;
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error("no room joined")]
    NoRoom,
    #[error("snapshot error: {0}")]
    Store(#[from] StoreError),
    #[error("record lookup failed: {0}")]
    Record(#[from] RecordError),
    #[error("save failed for room {room_id} after {attempts} attempts: {source}")]
    SaveFailed {
        room_id: String,
        attempts: usize,
        #[source]
        source: RecordError,
    },
}

impl ErrorCode for PersistenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::NoRoom => "E_NO_ROOM",
            Self::Store(e) => e.error_code(),
            Self::Record(e) => e.error_code(),
            Self::SaveFailed { .. } => "E_SAVE_FAILED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Record(e) => e.retryable(),
            Self::SaveFailed { .. } => true,
            Self::RoomNotFound(_) | Self::NoRoom | Self::Store(_) => false,
        }
    }
}

// =============================================================================
// BRIDGE
// =============================================================================

/// Debounced saver and hydrator for one client's current room.
pub struct PersistenceBridge {
    records: Arc<dyn BoardRecordStore>,
    config: PersistenceConfig,
    user_id: Uuid,
    room_id: Option<String>,
    debouncer: Debouncer,
    dirty: bool,
}

impl PersistenceBridge {
    /// `user_id` owns any record created implicitly by a first save.
    #[must_use]
    pub fn new(records: Arc<dyn BoardRecordStore>, user_id: Uuid, config: PersistenceConfig) -> Self {
        Self {
            records,
            config,
            user_id,
            room_id: None,
            debouncer: Debouncer::new(config.debounce, config.max_wait),
            dirty: false,
        }
    }

    #[must_use]
    pub fn records(&self) -> Arc<dyn BoardRecordStore> {
        Arc::clone(&self.records)
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Point the bridge at a room. Pending saves for the previous room are
    /// forgotten; flush first if they matter.
    pub fn attach(&mut self, room_id: &str) {
        self.room_id = Some(room_id.to_owned());
        self.dirty = false;
        self.debouncer.reset();
    }

    /// Stop saving (session exit after the final flush).
    pub fn detach(&mut self) {
        self.room_id = None;
        self.dirty = false;
        self.debouncer.reset();
    }

    /// Fetch the last durable snapshot for `room_id`.
    ///
    /// Takes the record store by value so the lookup can run while the
    /// caller keeps accepting (queued) edits.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` when no record exists, `Record` on lookup failure.
    pub async fn fetch_snapshot(records: Arc<dyn BoardRecordStore>, room_id: String) -> Result<Value, PersistenceError> {
        match records.find_by_room_id(&room_id).await? {
            Some(record) => Ok(record.board_data),
            None => Err(PersistenceError::RoomNotFound(room_id)),
        }
    }

    /// Attach to `room_id`, fetch its snapshot, and restore it into `store`.
    /// Returns the number of restored objects.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` when no record exists (the bridge stays attached, so the
    /// first save creates it), `Record` on lookup failure, `Store` when the
    /// snapshot is malformed.
    pub async fn hydrate(&mut self, room_id: &str, store: &mut CanvasObjectStore) -> Result<usize, PersistenceError> {
        self.attach(room_id);
        let snapshot = Self::fetch_snapshot(self.records(), room_id.to_owned()).await?;
        store.restore(snapshot)?;
        info!(%room_id, count = store.len(), "room hydrated");
        Ok(store.len())
    }

    /// Note a store mutation. Starts or extends the debounce window.
    pub fn schedule_save(&mut self, now: Instant) {
        if self.room_id.is_none() {
            return;
        }
        self.dirty = true;
        self.debouncer.trigger(now);
    }

    /// When the next debounced save should run.
    #[must_use]
    pub fn save_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Run the debounced save if its deadline has passed. Returns whether a
    /// save was written.
    ///
    /// # Errors
    ///
    /// Same as [`Self::flush_save`].
    pub async fn save_if_due(&mut self, store: &CanvasObjectStore, now: Instant) -> Result<bool, PersistenceError> {
        if !self.debouncer.is_due(now) {
            return Ok(false);
        }
        self.flush_save(store).await.map(|()| true)
    }

    /// Save now, bypassing the debounce. A clean bridge writes nothing.
    ///
    /// # Errors
    ///
    /// `NoRoom` when detached, `Store` when the snapshot cannot be built,
    /// `SaveFailed` after the last write attempt fails (still dirty).
    pub async fn flush_save(&mut self, store: &CanvasObjectStore) -> Result<(), PersistenceError> {
        let Some(room_id) = self.room_id.clone() else {
            return Err(PersistenceError::NoRoom);
        };
        self.debouncer.reset();
        if !self.dirty {
            return Ok(());
        }

        let snapshot = store.snapshot()?;
        let attempts = self.config.retries.max(1);
        for attempt in 1..=attempts {
            match self.records.upsert_board_data(&room_id, self.user_id, &snapshot).await {
                Ok(()) => {
                    self.dirty = false;
                    debug!(%room_id, count = store.len(), attempt, "board saved");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(error = %e, %room_id, attempt, total = attempts, "board save failed; retrying");
                    let backoff = self.config.retry_base * u32::try_from(attempt).unwrap_or(u32::MAX);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(error = %e, %room_id, attempts, "board save failed after retries");
                    return Err(PersistenceError::SaveFailed { room_id, attempts, source: e });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
