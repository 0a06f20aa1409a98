//! Board service: owner-scoped operations on durable board records.
//!
//! DESIGN
//! ======
//! Thin policy layer over [`BoardRecordStore`]. Stores report owner-scoped
//! writes as affected counts; this layer turns a zero count into
//! `PermissionDenied` so routes never have to interpret counts.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::canvas::store::{CanvasObjectStore, StoreError};
use crate::db::{BoardRecord, BoardRecordStore, RecordError};
use crate::frame::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("board not found: {0}")]
    NotFound(String),
    #[error("permission denied for board {0}")]
    PermissionDenied(Uuid),
    #[error("room already exists: {0}")]
    RoomExists(String),
    #[error("invalid board name")]
    InvalidName,
    #[error("invalid board data: {0}")]
    InvalidSnapshot(#[from] StoreError),
    #[error("record store error: {0}")]
    Record(RecordError),
}

impl From<RecordError> for BoardError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::RoomExists(room_id) => Self::RoomExists(room_id),
            other => Self::Record(other),
        }
    }
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_BOARD_NOT_FOUND",
            Self::PermissionDenied(_) => "E_PERMISSION_DENIED",
            Self::RoomExists(_) => "E_ROOM_EXISTS",
            Self::InvalidName => "E_INVALID_NAME",
            Self::InvalidSnapshot(_) => "E_INVALID_SNAPSHOT",
            Self::Record(_) => "E_RECORD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Record(e) if e.retryable())
    }
}

/// Generate a collision-resistant room id.
#[must_use]
pub fn new_room_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn validate_name(name: &str) -> Result<&str, BoardError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BoardError::InvalidName);
    }
    Ok(name)
}

// =============================================================================
// CRUD
// =============================================================================

/// Create a board owned by `user_id`. A room id is generated when none is given.
///
/// # Errors
///
/// `InvalidName` for a blank name, `RoomExists` if the room id is taken.
pub async fn create_board(
    records: &Arc<dyn BoardRecordStore>,
    user_id: Uuid,
    name: &str,
    room_id: Option<&str>,
) -> Result<BoardRecord, BoardError> {
    let name = validate_name(name)?;
    let room_id = room_id.map_or_else(new_room_id, str::to_owned);
    let record = records.create(user_id, &room_id, name).await?;
    info!(board_id = %record.id, %room_id, %user_id, "board created");
    Ok(record)
}

/// Rename a board. Only its owner may rename it.
///
/// # Errors
///
/// `PermissionDenied` if the board does not exist or is not owned by `user_id`.
pub async fn rename_board(
    records: &Arc<dyn BoardRecordStore>,
    board_id: Uuid,
    user_id: Uuid,
    name: &str,
) -> Result<(), BoardError> {
    let name = validate_name(name)?;
    if records.update_name_by_id_and_owner(board_id, user_id, name).await? == 0 {
        return Err(BoardError::PermissionDenied(board_id));
    }
    Ok(())
}

/// Delete a board. Only its owner may delete it.
///
/// # Errors
///
/// `PermissionDenied` if the board does not exist or is not owned by `user_id`.
pub async fn delete_board(records: &Arc<dyn BoardRecordStore>, board_id: Uuid, user_id: Uuid) -> Result<(), BoardError> {
    if records.delete_by_id_and_owner(board_id, user_id).await? == 0 {
        return Err(BoardError::PermissionDenied(board_id));
    }
    info!(%board_id, %user_id, "board deleted");
    Ok(())
}

/// Fetch a board by room id.
///
/// # Errors
///
/// `NotFound` when no record exists for the room.
pub async fn get_board_by_room(records: &Arc<dyn BoardRecordStore>, room_id: &str) -> Result<BoardRecord, BoardError> {
    records
        .find_by_room_id(room_id)
        .await?
        .ok_or_else(|| BoardError::NotFound(room_id.to_owned()))
}

/// Boards owned by `user_id`, most recently updated first.
///
/// # Errors
///
/// Returns a record store error if the query fails.
pub async fn list_boards(records: &Arc<dyn BoardRecordStore>, user_id: Uuid) -> Result<Vec<BoardRecord>, BoardError> {
    Ok(records.list_by_owner(user_id).await?)
}

/// Write a room's canvas snapshot, creating the record on first save.
///
/// # Errors
///
/// `InvalidSnapshot` unless `board_data` is a snapshot a replica could
/// restore. Returns a record store error if the write fails.
pub async fn save_board_data(
    records: &Arc<dyn BoardRecordStore>,
    room_id: &str,
    user_id: Uuid,
    board_data: &Value,
) -> Result<(), BoardError> {
    CanvasObjectStore::new().restore(board_data.clone())?;
    records.upsert_board_data(room_id, user_id, board_data).await?;
    Ok(())
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
