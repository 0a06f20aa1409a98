//! Client session: one participant's replica, history, presence, and saver.
//!
//! DESIGN
//! ======
//! `ClientSession` is the only writer of its `CanvasObjectStore`. Every
//! operation (local edit, history replay, inbound frame) mutates the store
//! and then drains the store's event stream:
//! - `Local` mutations → `object:*` frames on the outbound sync channel
//! - every mutation → `PersistenceBridge::schedule_save`
//!
//! The session never talks to a socket. The transport owns the other end of
//! `outbound` and feeds inbound frames to `handle_frame`, so the whole state
//! machine runs synchronously in tests.
//!
//! LIFECYCLE
//! =========
//! 1. `begin_join` → store emptied, history and peers cleared, bridge attached
//! 2. Caller awaits `Hydration::fetch` (edits and `object:*` frames queue up)
//! 3. `finish_join` → snapshot restored, queue replayed in issue order
//! 4. Edits, gestures, undo/redo, inbound frames
//! 5. `leave` → final flush, bridge detached
//!
//! TRADE-OFFS
//! ==========
//! Undo and redo are not queued during hydration: history was cleared at
//! `begin_join` and queued edits are recorded only when replayed, so there
//! is nothing to undo yet.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::history::{HistoryManager, HistoryOutcome, UndoableAction};
use super::object::{CanvasObjectContent, FieldMap, ObjectId};
use super::presence::{PresencePatch, PresenceTracker, PresenceUpdate};
use super::store::{CanvasObjectStore, Mutation, Origin, StoreError, StoreEvent};
use crate::config::Config;
use crate::db::BoardRecordStore;
use crate::frame::{self, Data, ErrorCode, Frame, FrameError, Status};
use crate::services::persistence::{PersistenceBridge, PersistenceError};

// =============================================================================
// TYPES
// =============================================================================

/// Where the session is in the room lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    /// Snapshot lookup in flight. Edits and object frames are queued.
    Hydrating(String),
    Joined(String),
}

/// Whether a local edit hit the store now or was queued behind hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    Queued,
}

#[derive(Debug, Clone)]
enum LocalEdit {
    Add(CanvasObjectContent),
    Remove(ObjectId),
    Modify { id: ObjectId, fields: FieldMap },
}

#[derive(Debug)]
enum Pending {
    Edit(LocalEdit),
    Frame(Frame),
}

/// An in-progress drag. `state_before` grows as new keys are touched.
struct Gesture {
    object_id: ObjectId,
    state_before: FieldMap,
}

/// Snapshot lookup started by `begin_join`. Owns everything it needs, so it
/// can be awaited while the session keeps taking edits.
pub struct Hydration {
    records: Arc<dyn BoardRecordStore>,
    room_id: String,
}

/// Result of [`Hydration::fetch`], handed back to `finish_join`.
pub struct Hydrated {
    room_id: String,
    snapshot: Result<Value, PersistenceError>,
}

impl Hydration {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn fetch(self) -> Hydrated {
        let snapshot = PersistenceBridge::fetch_snapshot(self.records, self.room_id.clone()).await;
        Hydrated { room_id: self.room_id, snapshot }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not joined to a room")]
    NotJoined,
    #[error("no gesture in progress")]
    NoGesture,
    #[error("hydration result for {0} arrived after the session moved on")]
    StaleHydration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotJoined => "E_NOT_JOINED",
            Self::NoGesture => "E_NO_GESTURE",
            Self::StaleHydration(_) => "E_STALE_HYDRATION",
            Self::Store(e) => e.error_code(),
            Self::Persistence(e) => e.error_code(),
            Self::Frame(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Persistence(e) => e.retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// WIRE ENCODING
// =============================================================================

/// Encode a store mutation as an `object:*` sync frame.
///
/// # Errors
///
/// Returns `FrameError::Payload` if the object content cannot be serialized.
pub fn mutation_to_frame(mutation: &Mutation) -> Result<Frame, FrameError> {
    let frame = match mutation {
        Mutation::Add { id, content } => Frame::request(frame::OBJECT_ADD, Data::new())
            .with_data("id", id.clone())
            .with_data("content", serde_json::to_value(content)?),
        Mutation::Remove { id } => Frame::request(frame::OBJECT_REMOVE, Data::new()).with_data("id", id.clone()),
        Mutation::SetFields { id, fields } => Frame::request(frame::OBJECT_SET, Data::new())
            .with_data("id", id.clone())
            .with_data("fields", Value::Object(fields.clone())),
    };
    Ok(frame)
}

/// Decode an `object:*` sync frame.
///
/// # Errors
///
/// `MissingField` for an absent `id`/`content`/`fields`, `Payload` for
/// malformed content, `UnknownSyscall` for anything not `object:*`.
pub fn mutation_from_frame(frame: &Frame) -> Result<Mutation, FrameError> {
    let missing = |field: &'static str| FrameError::MissingField(field, frame.syscall.clone());
    let id = frame.str_field("id").ok_or_else(|| missing("id"))?.to_owned();
    match frame.syscall.as_str() {
        frame::OBJECT_ADD => {
            let content = frame.data.get("content").ok_or_else(|| missing("content"))?;
            Ok(Mutation::Add { id, content: serde_json::from_value(content.clone())? })
        }
        frame::OBJECT_REMOVE => Ok(Mutation::Remove { id }),
        frame::OBJECT_SET => {
            let Some(Value::Object(fields)) = frame.data.get("fields") else {
                return Err(missing("fields"));
            };
            Ok(Mutation::SetFields { id, fields: fields.clone() })
        }
        other => Err(FrameError::UnknownSyscall(other.to_owned())),
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct ClientSession {
    store: CanvasObjectStore,
    events: mpsc::UnboundedReceiver<StoreEvent>,
    history: HistoryManager,
    presence: PresenceTracker,
    bridge: PersistenceBridge,
    outbound: mpsc::UnboundedSender<Frame>,
    state: JoinState,
    pending: VecDeque<Pending>,
    gesture: Option<Gesture>,
}

impl ClientSession {
    /// `user_id` owns any board record created by this session's first save.
    #[must_use]
    pub fn new(
        records: Arc<dyn BoardRecordStore>,
        user_id: Uuid,
        config: &Config,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        let mut store = CanvasObjectStore::new();
        let events = store.subscribe();
        Self {
            store,
            events,
            history: HistoryManager::new(config.history_limit),
            presence: PresenceTracker::new(config.presence_frame),
            bridge: PersistenceBridge::new(records, user_id, config.persistence),
            outbound,
            state: JoinState::Idle,
            pending: VecDeque::new(),
            gesture: None,
        }
    }

    #[must_use]
    pub fn store(&self) -> &CanvasObjectStore {
        &self.store
    }

    #[must_use]
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    #[must_use]
    pub fn bridge(&self) -> &PersistenceBridge {
        &self.bridge
    }

    #[must_use]
    pub fn state(&self) -> &JoinState {
        &self.state
    }

    /// The room currently joined or being hydrated.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match &self.state {
            JoinState::Idle => None,
            JoinState::Hydrating(room_id) | JoinState::Joined(room_id) => Some(room_id),
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // -------------------------------------------------------------------------
    // Room lifecycle
    // -------------------------------------------------------------------------

    /// Switch to `room_id` and start its snapshot lookup.
    ///
    /// Restarting the join for the room already being hydrated keeps the
    /// queued edits. Any unsaved changes of a previous room are dropped;
    /// `join` flushes them first.
    pub fn begin_join(&mut self, room_id: &str) -> Hydration {
        let rehydrate = self.state == JoinState::Hydrating(room_id.to_owned());
        if !rehydrate {
            self.pending.clear();
            self.gesture = None;
            self.history.clear();
            self.presence.clear_peers();
            if let Err(e) = self.store.restore(Value::Object(FieldMap::new())) {
                warn!(error = %e, "session: failed to clear replica");
            }
            self.bridge.attach(room_id);
            self.state = JoinState::Hydrating(room_id.to_owned());
        }
        self.drain_events();
        debug!(%room_id, rehydrate, "session: hydrating");
        Hydration { records: self.bridge.records(), room_id: room_id.to_owned() }
    }

    /// Restore the fetched snapshot and replay everything queued meanwhile.
    /// Returns the number of objects restored.
    ///
    /// A missing record starts the room empty; its first save creates it.
    ///
    /// # Errors
    ///
    /// `StaleHydration` when the session has since joined another room.
    /// `Persistence` or `Store` when the lookup failed or the snapshot is
    /// malformed; the session stays hydrating with its queue intact, so the
    /// caller can retry with `begin_join`.
    pub fn finish_join(&mut self, hydrated: Hydrated) -> Result<usize, SessionError> {
        let Hydrated { room_id, snapshot } = hydrated;
        if self.state != JoinState::Hydrating(room_id.clone()) {
            debug!(%room_id, "session: dropping stale hydration");
            return Err(SessionError::StaleHydration(room_id));
        }

        let restored = match snapshot {
            Ok(snapshot) => {
                self.store.restore(snapshot)?;
                self.store.len()
            }
            Err(PersistenceError::RoomNotFound(_)) => {
                info!(%room_id, "session: no saved board; starting empty");
                0
            }
            Err(e) => return Err(e.into()),
        };

        self.state = JoinState::Joined(room_id.clone());
        let queued = self.pending.len();
        while let Some(pending) = self.pending.pop_front() {
            let result = match pending {
                Pending::Edit(edit) => self.apply_edit(edit),
                Pending::Frame(frame) => self.apply_frame(frame),
            };
            if let Err(e) = result {
                warn!(error = %e, %room_id, "session: queued operation dropped on replay");
            }
        }
        self.drain_events();
        info!(%room_id, restored, queued, "session: joined");
        Ok(restored)
    }

    /// Flush the current room, then join and hydrate `room_id`.
    ///
    /// A failed flush of the previous room is logged and does not block the
    /// switch; the bridge has already retried it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::finish_join`].
    pub async fn join(&mut self, room_id: &str) -> Result<usize, SessionError> {
        if matches!(self.state, JoinState::Joined(_)) {
            if let Err(e) = self.bridge.flush_save(&self.store).await {
                warn!(error = %e, "session: flush before room switch failed");
            }
        }
        let hydration = self.begin_join(room_id);
        let hydrated = hydration.fetch().await;
        self.finish_join(hydrated)
    }

    /// Final flush, then detach from the room.
    ///
    /// # Errors
    ///
    /// Returns the flush failure and stays in the room, so the caller can
    /// prompt and retry.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        if matches!(self.state, JoinState::Joined(_)) {
            self.bridge.flush_save(&self.store).await?;
        }
        self.bridge.detach();
        self.pending.clear();
        self.gesture = None;
        self.history.clear();
        self.presence.clear_peers();
        self.store.restore(Value::Object(FieldMap::new()))?;
        self.drain_events();
        self.state = JoinState::Idle;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Local edits
    // -------------------------------------------------------------------------

    /// Create an object. Its id is the one embedded in `content`.
    ///
    /// # Errors
    ///
    /// `NotJoined` outside a room, store errors (`DuplicateId`, `IdMismatch`)
    /// when applied immediately.
    pub fn add_object(&mut self, content: CanvasObjectContent) -> Result<EditOutcome, SessionError> {
        self.submit(LocalEdit::Add(content))
    }

    /// Delete an object. Deleting an already-removed id is a no-op.
    ///
    /// # Errors
    ///
    /// `NotJoined` outside a room, `Store(NotFound)` for a never-seen id.
    pub fn remove_object(&mut self, id: &str) -> Result<EditOutcome, SessionError> {
        self.submit(LocalEdit::Remove(id.to_owned()))
    }

    /// One-shot field update, recorded as a single `Modify`.
    ///
    /// # Errors
    ///
    /// `NotJoined` outside a room, `Store(NotFound)` for an absent object.
    pub fn modify_object(&mut self, id: &str, fields: FieldMap) -> Result<EditOutcome, SessionError> {
        self.submit(LocalEdit::Modify { id: id.to_owned(), fields })
    }

    fn submit(&mut self, edit: LocalEdit) -> Result<EditOutcome, SessionError> {
        match &self.state {
            JoinState::Idle => Err(SessionError::NotJoined),
            JoinState::Hydrating(_) => {
                self.pending.push_back(Pending::Edit(edit));
                Ok(EditOutcome::Queued)
            }
            JoinState::Joined(_) => {
                let result = self.apply_edit(edit);
                self.drain_events();
                result.map(|()| EditOutcome::Applied)
            }
        }
    }

    fn apply_edit(&mut self, edit: LocalEdit) -> Result<(), SessionError> {
        match edit {
            LocalEdit::Add(content) => {
                let object_id = content.id().to_owned();
                self.store.add(&object_id, content.clone())?;
                self.history.record(UndoableAction::Add { object_id, snapshot: content });
            }
            LocalEdit::Remove(id) => {
                if let Some(previous_object_state) = self.store.remove(&id)? {
                    self.history.record(UndoableAction::Delete { previous_object_state });
                }
            }
            LocalEdit::Modify { id, fields } => {
                let state_before =
                    self.store.fields_of(&id, fields.keys()).ok_or_else(|| StoreError::NotFound(id.clone()))?;
                self.store.set_fields(&id, &fields)?;
                let state_after = self.store.fields_of(&id, fields.keys()).unwrap_or(fields);
                if state_before != state_after {
                    self.history.record(UndoableAction::Modify { object_id: id, state_before, state_after });
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Gestures
    // -------------------------------------------------------------------------

    /// Start a drag on `object_id`. Ends any gesture already in progress.
    ///
    /// # Errors
    ///
    /// `NotJoined` unless joined, `Store(NotFound)` for an absent object.
    pub fn begin_gesture(&mut self, object_id: &str) -> Result<(), SessionError> {
        if !matches!(self.state, JoinState::Joined(_)) {
            return Err(SessionError::NotJoined);
        }
        if self.gesture.is_some() {
            self.end_gesture()?;
        }
        if !self.store.contains(object_id) {
            return Err(StoreError::NotFound(object_id.to_owned()).into());
        }
        self.gesture = Some(Gesture { object_id: object_id.to_owned(), state_before: FieldMap::new() });
        Ok(())
    }

    /// Apply one live drag frame. Broadcast to peers, not recorded.
    ///
    /// # Errors
    ///
    /// `NoGesture` without `begin_gesture`; `Store(NotFound)` if a peer
    /// deleted the object mid-drag, which also ends the gesture.
    pub fn update_gesture(&mut self, fields: &FieldMap) -> Result<(), SessionError> {
        let Some(gesture) = self.gesture.as_mut() else {
            return Err(SessionError::NoGesture);
        };

        let untouched: Vec<String> =
            fields.keys().filter(|key| !gesture.state_before.contains_key(*key)).cloned().collect();
        let result = match self.store.fields_of(&gesture.object_id, untouched.iter()) {
            Some(before) => {
                gesture.state_before.extend(before);
                self.store.set_fields(&gesture.object_id, fields)
            }
            None => Err(StoreError::NotFound(gesture.object_id.clone())),
        };

        if result.is_err() {
            self.gesture = None;
        }
        self.drain_events();
        result.map_err(SessionError::from)
    }

    /// Finish the drag, recording one `Modify` from start to end state.
    /// Returns whether an action was recorded.
    ///
    /// # Errors
    ///
    /// `NoGesture` without `begin_gesture`.
    pub fn end_gesture(&mut self) -> Result<bool, SessionError> {
        let Some(Gesture { object_id, state_before }) = self.gesture.take() else {
            return Err(SessionError::NoGesture);
        };
        if state_before.is_empty() {
            return Ok(false);
        }
        let Some(state_after) = self.store.fields_of(&object_id, state_before.keys()) else {
            debug!(%object_id, "session: gesture target removed; nothing recorded");
            return Ok(false);
        };
        if state_after == state_before {
            return Ok(false);
        }
        self.history.record(UndoableAction::Modify { object_id, state_before, state_after });
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Undo the most recent local edit. `Empty` outside a joined room.
    pub fn undo(&mut self) -> HistoryOutcome {
        if !matches!(self.state, JoinState::Joined(_)) {
            return HistoryOutcome::Empty;
        }
        let outcome = self.history.undo(&mut self.store);
        self.drain_events();
        outcome
    }

    /// Redo the most recently undone edit. `Empty` outside a joined room.
    pub fn redo(&mut self) -> HistoryOutcome {
        if !matches!(self.state, JoinState::Joined(_)) {
            return HistoryOutcome::Empty;
        }
        let outcome = self.history.redo(&mut self.store);
        self.drain_events();
        outcome
    }

    // -------------------------------------------------------------------------
    // Inbound frames
    // -------------------------------------------------------------------------

    /// Apply one frame from the sync channel. Never records history.
    ///
    /// # Errors
    ///
    /// `Frame` when the payload cannot be decoded or the syscall is unknown.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        if frame.status == Status::Error {
            let code = frame.str_field(frame::FRAME_CODE).unwrap_or("-");
            let message = frame.str_field(frame::FRAME_MESSAGE).unwrap_or("-");
            warn!(syscall = %frame.syscall, code, message, "session: relay rejected frame");
            return Ok(());
        }
        if let (Some(frame_room), Some(room_id)) = (frame.room_id.as_deref(), self.room_id()) {
            if frame_room != room_id {
                debug!(%frame_room, %room_id, syscall = %frame.syscall, "session: frame for another room dropped");
                return Ok(());
            }
        }
        if frame.prefix() == "object" && matches!(self.state, JoinState::Hydrating(_)) {
            self.pending.push_back(Pending::Frame(frame));
            return Ok(());
        }
        let result = self.apply_frame(frame);
        self.drain_events();
        result
    }

    fn apply_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match frame.syscall.as_str() {
            frame::OBJECT_ADD | frame::OBJECT_REMOVE | frame::OBJECT_SET => {
                if self.state == JoinState::Idle {
                    debug!(syscall = %frame.syscall, "session: object frame outside a room ignored");
                    return Ok(());
                }
                let mutation = mutation_from_frame(&frame)?;
                self.store.apply_remote(mutation);
            }
            frame::PRESENCE_UPDATE => {
                let update = PresenceUpdate::from_frame(&frame)?;
                self.presence.apply_peer(update);
            }
            frame::PRESENCE_LEFT => {
                let connection_id = frame
                    .str_field(frame::CONNECTION_ID)
                    .or(frame.from.as_deref())
                    .ok_or_else(|| FrameError::MissingField("connection_id", frame.syscall.clone()))?;
                self.presence.remove_peer(connection_id);
            }
            frame::SESSION_CONNECTED => {
                let connection_id = frame
                    .str_field(frame::CONNECTION_ID)
                    .ok_or_else(|| FrameError::MissingField("connection_id", frame.syscall.clone()))?;
                self.presence.set_connection_id(connection_id);
            }
            other => return Err(FrameError::UnknownSyscall(other.to_owned()).into()),
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Presence
    // -------------------------------------------------------------------------

    pub fn set_presence(&mut self, patch: PresencePatch) {
        self.presence.set_presence(patch);
    }

    /// Send the coalesced presence update if one is due. Returns whether a
    /// frame was sent.
    ///
    /// # Errors
    ///
    /// `Frame` when the presence record cannot be serialized.
    pub fn flush_presence(&mut self, now_ms: i64) -> Result<bool, SessionError> {
        let Some(update) = self.presence.take_update(now_ms) else {
            return Ok(false);
        };
        let frame = update.to_frame()?;
        self.send(frame);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Run the debounced save if due. Returns whether a save was written.
    ///
    /// # Errors
    ///
    /// `Persistence` when the save failed after retries.
    pub async fn save_if_due(&mut self, now: Instant) -> Result<bool, SessionError> {
        if !matches!(self.state, JoinState::Joined(_)) {
            return Ok(false);
        }
        Ok(self.bridge.save_if_due(&self.store, now).await?)
    }

    /// Save now (explicit save action).
    ///
    /// # Errors
    ///
    /// `NotJoined` outside a joined room, `Persistence` on save failure.
    pub async fn flush_save(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, JoinState::Joined(_)) {
            return Err(SessionError::NotJoined);
        }
        Ok(self.bridge.flush_save(&self.store).await?)
    }

    // -------------------------------------------------------------------------
    // Event pump
    // -------------------------------------------------------------------------

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            let StoreEvent::Mutated { origin, mutation } = event else {
                continue;
            };
            if origin == Origin::Local {
                match mutation_to_frame(&mutation) {
                    Ok(frame) => self.send(frame),
                    Err(e) => warn!(error = %e, id = %mutation.object_id(), "session: failed to encode mutation"),
                }
            }
            self.bridge.schedule_save(Instant::now());
        }
    }

    fn send(&self, frame: Frame) {
        let frame = match self.room_id() {
            Some(room_id) => frame.with_room_id(room_id),
            None => frame,
        };
        if self.outbound.send(frame).is_err() {
            debug!("session: outbound channel closed");
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
