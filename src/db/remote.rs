//! Board records over HTTP.
//!
//! Talks to the server's REST routes so a client process can hydrate from
//! and save to the same durable store the server fronts. Status codes are
//! mapped back onto the store contract: 404 on lookup is "no record",
//! 403/404 on owner-scoped writes is an affected count of zero, 409 on
//! create is `RoomExists`.

use reqwest::StatusCode;
use serde_json::Value;
use uuid::Uuid;

use super::{BoardRecord, BoardRecordStore, RecordError};
use crate::routes::USER_ID_HEADER;

pub struct RemoteBoardStore {
    http: reqwest::Client,
    base_url: String,
    user_id: Uuid,
}

impl RemoteBoardStore {
    /// `base_url` is the server origin, e.g. `http://localhost:3000`.
    /// Reads are issued as `user_id`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, user_id: Uuid) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http: reqwest::Client::new(), base_url, user_id }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `/api/rooms/{room_id}/{leaf}` with `room_id` percent-encoded as a
    /// single segment. Room ids are opaque and may contain `/`, `?` or `#`.
    fn room_url(&self, room_id: &str, leaf: &str) -> Result<reqwest::Url, RecordError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| RecordError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| RecordError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "rooms", room_id, leaf]);
        Ok(url)
    }
}

fn unexpected(status: StatusCode) -> RecordError {
    RecordError::Status(status.as_u16())
}

/// Map an owner-scoped write response to an affected count.
fn affected(status: StatusCode) -> Result<u64, RecordError> {
    if status.is_success() {
        return Ok(1);
    }
    match status {
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(0),
        other => Err(unexpected(other)),
    }
}

#[async_trait::async_trait]
impl BoardRecordStore for RemoteBoardStore {
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<BoardRecord>, RecordError> {
        let resp = self
            .http
            .get(self.room_url(room_id, "board")?)
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.json::<BoardRecord>().await?)),
            s => Err(unexpected(s)),
        }
    }

    async fn upsert_board_data(&self, room_id: &str, user_id: Uuid, board_data: &Value) -> Result<(), RecordError> {
        let resp = self
            .http
            .put(self.room_url(room_id, "board-data")?)
            .header(USER_ID_HEADER, user_id.to_string())
            .json(board_data)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(unexpected(resp.status()));
        }
        Ok(())
    }

    async fn create(&self, user_id: Uuid, room_id: &str, name: &str) -> Result<BoardRecord, RecordError> {
        let resp = self
            .http
            .post(self.url("/api/boards"))
            .header(USER_ID_HEADER, user_id.to_string())
            .json(&serde_json::json!({ "name": name, "room_id": room_id }))
            .send()
            .await?;

        match resp.status() {
            StatusCode::CONFLICT => Err(RecordError::RoomExists(room_id.to_owned())),
            s if s.is_success() => Ok(resp.json::<BoardRecord>().await?),
            s => Err(unexpected(s)),
        }
    }

    async fn update_name_by_id_and_owner(&self, id: Uuid, owner: Uuid, name: &str) -> Result<u64, RecordError> {
        let resp = self
            .http
            .patch(self.url(&format!("/api/boards/{id}")))
            .header(USER_ID_HEADER, owner.to_string())
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        affected(resp.status())
    }

    async fn delete_by_id_and_owner(&self, id: Uuid, owner: Uuid) -> Result<u64, RecordError> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/boards/{id}")))
            .header(USER_ID_HEADER, owner.to_string())
            .send()
            .await?;
        affected(resp.status())
    }

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<BoardRecord>, RecordError> {
        let resp = self
            .http
            .get(self.url("/api/boards"))
            .header(USER_ID_HEADER, owner.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(unexpected(resp.status()));
        }
        Ok(resp.json::<Vec<BoardRecord>>().await?)
    }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;
