//! Durable board records and the stores that hold them.
//!
//! SYSTEM CONTEXT
//! ==============
//! One record per room: its display name, owner, and the last saved canvas
//! snapshot (`board_data`). The engine only needs a keyed find/upsert and a
//! few owner-scoped writes, expressed by [`BoardRecordStore`]. Three
//! implementations exist:
//!
//! - [`PgBoardStore`]: Postgres via `sqlx`, used by the server.
//! - [`MemoryBoardStore`]: in-process map, used without `DATABASE_URL` and in tests.
//! - [`RemoteBoardStore`]: HTTP client for the server's REST routes, used by
//!   a client process's persistence bridge.
//!
//! Owner-scoped writes return an affected-row count. Zero means "not found
//! or not owned"; callers decide what that means, stores never raise it.

mod memory;
mod postgres;
mod remote;

pub use memory::MemoryBoardStore;
pub use postgres::PgBoardStore;
pub use remote::RemoteBoardStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Name given to a record created implicitly by a first save.
pub const DEFAULT_BOARD_NAME: &str = "Untitled Board";

// =============================================================================
// TYPES
// =============================================================================

/// One durable board record. `room_id` is unique and distinct from `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BoardRecord {
    pub id: Uuid,
    pub room_id: String,
    pub name: String,
    /// Canvas snapshot, keyed by object id.
    pub board_data: Value,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("room already exists: {0}")]
    RoomExists(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response status: {0}")]
    Status(u16),
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl crate::frame::ErrorCode for RecordError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomExists(_) => "E_ROOM_EXISTS",
            Self::Database(_) => "E_DATABASE",
            Self::Http(_) => "E_HTTP",
            Self::Status(_) => "E_HTTP_STATUS",
            Self::InvalidUrl(_) => "E_HTTP_URL",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::RoomExists(_) | Self::InvalidUrl(_) => false,
            Self::Database(_) | Self::Http(_) => true,
            Self::Status(code) => *code >= 500,
        }
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Keyed access to durable board records.
#[async_trait::async_trait]
pub trait BoardRecordStore: Send + Sync {
    /// Look up a record by room id.
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<BoardRecord>, RecordError>;

    /// Write `board_data` for a room, creating the record (owned by
    /// `user_id`) if none exists yet. Ownership of an existing record is
    /// never changed.
    async fn upsert_board_data(&self, room_id: &str, user_id: Uuid, board_data: &Value) -> Result<(), RecordError>;

    /// Create an empty record.
    ///
    /// # Errors
    ///
    /// `RoomExists` if `room_id` is taken.
    async fn create(&self, user_id: Uuid, room_id: &str, name: &str) -> Result<BoardRecord, RecordError>;

    /// Rename a record owned by `owner`. Returns the affected count.
    async fn update_name_by_id_and_owner(&self, id: Uuid, owner: Uuid, name: &str) -> Result<u64, RecordError>;

    /// Delete a record owned by `owner`. Returns the affected count.
    async fn delete_by_id_and_owner(&self, id: Uuid, owner: Uuid) -> Result<u64, RecordError>;

    /// All records owned by `owner`, most recently updated first.
    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<BoardRecord>, RecordError>;
}

// =============================================================================
// POOL
// =============================================================================

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
