//! Postgres-backed board records.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{BoardRecord, BoardRecordStore, DEFAULT_BOARD_NAME, RecordError};

const SELECT_COLUMNS: &str = "SELECT id, room_id, name, board_data, user_id, updated_at FROM boards";

#[derive(Clone)]
pub struct PgBoardStore {
    pool: PgPool,
}

impl PgBoardStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BoardRecordStore for PgBoardStore {
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<BoardRecord>, RecordError> {
        let row = sqlx::query_as::<_, BoardRecord>(&format!("{SELECT_COLUMNS} WHERE room_id = $1"))
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn upsert_board_data(&self, room_id: &str, user_id: Uuid, board_data: &Value) -> Result<(), RecordError> {
        sqlx::query(
            "INSERT INTO boards (id, room_id, name, board_data, user_id)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (room_id)
             DO UPDATE SET board_data = EXCLUDED.board_data, updated_at = now()",
        )
        .bind(Uuid::new_v4())
        .bind(room_id)
        .bind(DEFAULT_BOARD_NAME)
        .bind(board_data)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, user_id: Uuid, room_id: &str, name: &str) -> Result<BoardRecord, RecordError> {
        let result = sqlx::query_as::<_, BoardRecord>(
            "INSERT INTO boards (id, room_id, name, user_id)
             VALUES ($1, $2, $3, $4)
             RETURNING id, room_id, name, board_data, user_id, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(room_id)
        .bind(name)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(RecordError::RoomExists(room_id.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_name_by_id_and_owner(&self, id: Uuid, owner: Uuid, name: &str) -> Result<u64, RecordError> {
        let result = sqlx::query("UPDATE boards SET name = $3, updated_at = now() WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_id_and_owner(&self, id: Uuid, owner: Uuid) -> Result<u64, RecordError> {
        let result = sqlx::query("DELETE FROM boards WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<BoardRecord>, RecordError> {
        let rows = sqlx::query_as::<_, BoardRecord>(&format!("{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY updated_at DESC"))
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
