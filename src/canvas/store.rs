//! Replicated canvas object store.
//!
//! DESIGN
//! ======
//! Every client holds one `CanvasObjectStore` replica per room. It is the
//! single source of truth for what is drawn and is mutated only through
//! `add` / `remove` / `set_fields` (local edits) or `apply_remote` (edits
//! delivered by the sync channel). Observers such as the session's sync
//! forwarder, the persistence bridge, and the renderer never reach into the
//! map; they subscribe to `StoreEvent`s.
//!
//! CONFLICT POLICY
//! ===============
//! Last-writer-wins per field, by arrival order at this replica. Field maps
//! merge key by key, so concurrent edits to disjoint fields of one object
//! both survive. There is no version vector and no causal ordering.
//!
//! Removed ids are remembered as tombstones for the lifetime of the room so
//! a repeated removal (a replayed undo, or a peer removing first) is a no-op
//! rather than an error. Tombstones are cleared by `restore`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::object::{CanvasObjectContent, FieldMap, ID_FIELD, ObjectId};

// =============================================================================
// TYPES
// =============================================================================

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Issued by this client (direct edit or history replay).
    Local,
    /// Delivered from a peer by the sync channel.
    Remote,
}

/// A single addressed store mutation. Never a whole-store replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Add { id: ObjectId, content: CanvasObjectContent },
    Remove { id: ObjectId },
    SetFields { id: ObjectId, fields: FieldMap },
}

impl Mutation {
    #[must_use]
    pub fn object_id(&self) -> &str {
        match self {
            Self::Add { id, .. } | Self::Remove { id } | Self::SetFields { id, .. } => id,
        }
    }
}

/// Notification delivered to store subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Mutated { origin: Origin, mutation: Mutation },
    /// The whole replica was replaced from a durable snapshot.
    Restored { count: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate object id: {0}")]
    DuplicateId(ObjectId),
    #[error("object not found: {0}")]
    NotFound(ObjectId),
    #[error("object id mismatch: key {key} holds object {embedded}")]
    IdMismatch { key: ObjectId, embedded: ObjectId },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "E_DUPLICATE_ID",
            Self::NotFound(_) => "E_OBJECT_NOT_FOUND",
            Self::IdMismatch { .. } => "E_ID_MISMATCH",
            Self::Serialization(_) => "E_SERIALIZATION",
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

/// One client's replica of a room's objects.
#[derive(Default)]
pub struct CanvasObjectStore {
    objects: HashMap<ObjectId, CanvasObjectContent>,
    tombstones: HashSet<ObjectId>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl CanvasObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Insert a new object.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if `id` is already present, `IdMismatch` if the content
    /// carries a different id.
    pub fn add(&mut self, id: &str, content: CanvasObjectContent) -> Result<(), StoreError> {
        if content.id() != id {
            return Err(StoreError::IdMismatch { key: id.to_owned(), embedded: content.data.id });
        }
        if self.objects.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_owned()));
        }

        self.tombstones.remove(id);
        self.objects.insert(id.to_owned(), content.clone());
        self.emit(Origin::Local, Mutation::Add { id: id.to_owned(), content });
        Ok(())
    }

    /// Delete an object, returning the removed content.
    ///
    /// Returns `Ok(None)` if the object was already deleted in this room.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id was never present.
    pub fn remove(&mut self, id: &str) -> Result<Option<CanvasObjectContent>, StoreError> {
        let Some(content) = self.objects.remove(id) else {
            if self.tombstones.contains(id) {
                return Ok(None);
            }
            return Err(StoreError::NotFound(id.to_owned()));
        };

        self.tombstones.insert(id.to_owned());
        self.emit(Origin::Local, Mutation::Remove { id: id.to_owned() });
        Ok(Some(content))
    }

    /// Merge `partial` into an existing object's data.
    ///
    /// # Errors
    ///
    /// `NotFound` if the object does not exist.
    pub fn set_fields(&mut self, id: &str, partial: &FieldMap) -> Result<(), StoreError> {
        let Some(obj) = self.objects.get_mut(id) else {
            return Err(StoreError::NotFound(id.to_owned()));
        };

        let mut fields = partial.clone();
        fields.remove(ID_FIELD);
        if fields.is_empty() {
            return Ok(());
        }

        obj.data.merge(&fields);
        self.emit(Origin::Local, Mutation::SetFields { id: id.to_owned(), fields });
        Ok(())
    }

    /// Full current mapping as JSON, keyed by object id.
    ///
    /// # Errors
    ///
    /// `Serialization` if a field value cannot be represented as JSON.
    pub fn snapshot(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(&self.objects)?)
    }

    /// Replace the entire replica with a snapshot. Only used at room join.
    ///
    /// A `null` snapshot restores an empty store.
    ///
    /// # Errors
    ///
    /// `Serialization` for a malformed snapshot, `IdMismatch` if a key does
    /// not match the id inside its object. The store is left untouched on error.
    pub fn restore(&mut self, snapshot: Value) -> Result<(), StoreError> {
        let objects: HashMap<ObjectId, CanvasObjectContent> = if snapshot.is_null() {
            HashMap::new()
        } else {
            serde_json::from_value(snapshot)?
        };

        if let Some((key, content)) = objects.iter().find(|(key, content)| content.id() != key.as_str()) {
            return Err(StoreError::IdMismatch { key: key.clone(), embedded: content.data.id.clone() });
        }

        let count = objects.len();
        self.objects = objects;
        self.tombstones.clear();
        self.broadcast(&StoreEvent::Restored { count });
        Ok(())
    }

    /// Apply a mutation delivered by the sync channel.
    ///
    /// Remote application never fails: an add for an existing id replaces
    /// it, and removals or field updates for absent objects are dropped.
    /// Returns whether the replica changed.
    pub fn apply_remote(&mut self, mutation: Mutation) -> bool {
        match &mutation {
            Mutation::Add { id, content } => {
                if content.id() != id {
                    warn!(key = %id, embedded = %content.id(), "remote add with mismatched id dropped");
                    return false;
                }
                self.tombstones.remove(id);
                self.objects.insert(id.clone(), content.clone());
            }
            Mutation::Remove { id } => {
                self.tombstones.insert(id.clone());
                if self.objects.remove(id).is_none() {
                    debug!(%id, "remote remove for absent object");
                    return false;
                }
            }
            Mutation::SetFields { id, fields } => {
                let Some(obj) = self.objects.get_mut(id) else {
                    debug!(%id, "remote set_fields for absent object dropped");
                    return false;
                };
                obj.data.merge(fields);
            }
        }

        self.emit(Origin::Remote, mutation);
        true
    }

    /// Return a reference to an object by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CanvasObjectContent> {
        self.objects.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// Current values of `keys` on an object (`null` for absent fields).
    #[must_use]
    pub fn fields_of<'a>(&self, id: &str, keys: impl IntoIterator<Item = &'a String>) -> Option<FieldMap> {
        self.objects.get(id).map(|obj| obj.data.capture(keys))
    }

    /// All object ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of objects currently in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the store contains no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn emit(&mut self, origin: Origin, mutation: Mutation) {
        self.broadcast(&StoreEvent::Mutated { origin, mutation });
    }

    fn broadcast(&mut self, event: &StoreEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
