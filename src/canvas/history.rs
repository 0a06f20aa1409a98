//! Per-client undo/redo log.
//!
//! DESIGN
//! ======
//! History is local to one client's session in one room. Each completed
//! local edit is recorded once as an `UndoableAction` carrying enough state
//! to invert it against the store. Remote edits are never recorded.
//!
//! Undo and redo apply through the store's normal mutation API, so their
//! effects are broadcast to peers like any other local edit.
//!
//! TRADE-OFFS
//! ==========
//! The store has no causal metadata, so history cannot tell whether a peer
//! changed a field after we recorded it. Undo restores the captured value
//! regardless (last writer wins). If the target object is gone, the action
//! is discarded: there is no well-defined state to restore.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::object::{CanvasObjectContent, FieldMap, ObjectId};
use super::store::{CanvasObjectStore, StoreError};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One invertible local edit.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoableAction {
    /// Object created. `snapshot` is what redo re-adds.
    Add { object_id: ObjectId, snapshot: CanvasObjectContent },
    /// Object deleted. Undo re-adds `previous_object_state` verbatim.
    Delete { previous_object_state: CanvasObjectContent },
    /// Fields changed. Both sides cover the same keys; `null` means absent.
    Modify { object_id: ObjectId, state_before: FieldMap, state_after: FieldMap },
}

impl UndoableAction {
    #[must_use]
    pub fn object_id(&self) -> &str {
        match self {
            Self::Add { object_id, .. } | Self::Modify { object_id, .. } => object_id,
            Self::Delete { previous_object_state } => previous_object_state.id(),
        }
    }
}

/// Result of an `undo` or `redo` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Nothing to undo/redo.
    Empty,
    /// The action was applied and moved to the opposite stack.
    Applied,
    /// The target no longer exists; the action was dropped.
    Discarded,
}

#[derive(Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

/// Bounded undo/redo stacks for one client session.
pub struct HistoryManager {
    undo_stack: VecDeque<UndoableAction>,
    redo_stack: Vec<UndoableAction>,
    limit: usize,
}

impl HistoryManager {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { undo_stack: VecDeque::new(), redo_stack: Vec::new(), limit: limit.max(1) }
    }

    /// Record a completed local edit. Invalidates the redo future.
    pub fn record(&mut self, action: UndoableAction) {
        self.undo_stack.push_back(action);
        while self.undo_stack.len() > self.limit {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    /// Invert the most recent action against `store`.
    pub fn undo(&mut self, store: &mut CanvasObjectStore) -> HistoryOutcome {
        let Some(action) = self.undo_stack.pop_back() else {
            return HistoryOutcome::Empty;
        };

        match apply(store, action, Direction::Undo) {
            Some(action) => {
                self.redo_stack.push(action);
                HistoryOutcome::Applied
            }
            None => HistoryOutcome::Discarded,
        }
    }

    /// Re-apply the most recently undone action against `store`.
    pub fn redo(&mut self, store: &mut CanvasObjectStore) -> HistoryOutcome {
        let Some(action) = self.redo_stack.pop() else {
            return HistoryOutcome::Empty;
        };

        match apply(store, action, Direction::Redo) {
            Some(action) => {
                self.undo_stack.push_back(action);
                HistoryOutcome::Applied
            }
            None => HistoryOutcome::Discarded,
        }
    }

    /// Drop both stacks (room change).
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

// =============================================================================
// INVERSION
// =============================================================================

/// Apply `action` in `direction`. Returns the action to push on the opposite
/// stack, or `None` if it had to be discarded.
fn apply(store: &mut CanvasObjectStore, action: UndoableAction, direction: Direction) -> Option<UndoableAction> {
    let result = match (action, direction) {
        (UndoableAction::Add { object_id, snapshot: _ }, Direction::Undo) => {
            // Keep what was actually removed so redo restores the latest state.
            store
                .remove(&object_id)
                .map(|removed| removed.map(|snapshot| UndoableAction::Add { object_id, snapshot }))
        }
        (UndoableAction::Add { object_id, snapshot }, Direction::Redo) => store
            .add(&object_id, snapshot.clone())
            .map(|()| Some(UndoableAction::Add { object_id, snapshot })),
        (UndoableAction::Delete { previous_object_state }, Direction::Undo) => {
            let id = previous_object_state.id().to_owned();
            store
                .add(&id, previous_object_state.clone())
                .map(|()| Some(UndoableAction::Delete { previous_object_state }))
        }
        (UndoableAction::Delete { previous_object_state }, Direction::Redo) => store
            .remove(previous_object_state.id())
            .map(|removed| removed.map(|previous_object_state| UndoableAction::Delete { previous_object_state })),
        (UndoableAction::Modify { object_id, state_before, state_after }, direction) => {
            let fields = match direction {
                Direction::Undo => &state_before,
                Direction::Redo => &state_after,
            };
            store
                .set_fields(&object_id, fields)
                .map(|()| Some(UndoableAction::Modify { object_id, state_before, state_after }))
        }
    };

    match result {
        Ok(Some(action)) => Some(action),
        Ok(None) => {
            debug!("history target already removed; discarding action");
            None
        }
        Err(StoreError::NotFound(id)) => {
            debug!(%id, "history target not found; discarding action");
            None
        }
        Err(e) => {
            warn!(error = %e, "history replay rejected by store; discarding action");
            None
        }
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
