//! In-process board records.
//!
//! Same contract as the Postgres store, held in a `RwLock<HashMap>` keyed by
//! room id. Used when no database is configured and as the default store in
//! tests.

use std::collections::HashMap;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BoardRecord, BoardRecordStore, DEFAULT_BOARD_NAME, RecordError};

#[derive(Default)]
pub struct MemoryBoardStore {
    records: RwLock<HashMap<String, BoardRecord>>,
}

impl MemoryBoardStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn empty_board() -> Value {
    Value::Object(serde_json::Map::new())
}

#[async_trait::async_trait]
impl BoardRecordStore for MemoryBoardStore {
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<BoardRecord>, RecordError> {
        Ok(self.records.read().await.get(room_id).cloned())
    }

    async fn upsert_board_data(&self, room_id: &str, user_id: Uuid, board_data: &Value) -> Result<(), RecordError> {
        let mut records = self.records.write().await;
        let now = OffsetDateTime::now_utc();
        records
            .entry(room_id.to_owned())
            .and_modify(|record| {
                record.board_data = board_data.clone();
                record.updated_at = now;
            })
            .or_insert_with(|| BoardRecord {
                id: Uuid::new_v4(),
                room_id: room_id.to_owned(),
                name: DEFAULT_BOARD_NAME.to_owned(),
                board_data: board_data.clone(),
                user_id,
                updated_at: now,
            });
        Ok(())
    }

    async fn create(&self, user_id: Uuid, room_id: &str, name: &str) -> Result<BoardRecord, RecordError> {
        let mut records = self.records.write().await;
        if records.contains_key(room_id) {
            return Err(RecordError::RoomExists(room_id.to_owned()));
        }
        let record = BoardRecord {
            id: Uuid::new_v4(),
            room_id: room_id.to_owned(),
            name: name.to_owned(),
            board_data: empty_board(),
            user_id,
            updated_at: OffsetDateTime::now_utc(),
        };
        records.insert(room_id.to_owned(), record.clone());
        Ok(record)
    }

    async fn update_name_by_id_and_owner(&self, id: Uuid, owner: Uuid, name: &str) -> Result<u64, RecordError> {
        let mut records = self.records.write().await;
        let Some(record) = records.values_mut().find(|r| r.id == id && r.user_id == owner) else {
            return Ok(0);
        };
        record.name = name.to_owned();
        record.updated_at = OffsetDateTime::now_utc();
        Ok(1)
    }

    async fn delete_by_id_and_owner(&self, id: Uuid, owner: Uuid) -> Result<u64, RecordError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.id == id && r.user_id == owner));
        Ok((before - records.len()) as u64)
    }

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<BoardRecord>, RecordError> {
        let records = self.records.read().await;
        let mut out: Vec<BoardRecord> = records.values().filter(|r| r.user_id == owner).cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.room_id.cmp(&b.room_id)));
        Ok(out)
    }
}
