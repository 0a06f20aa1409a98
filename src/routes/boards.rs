//! Board record routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::BoardRecord;
use crate::routes::AuthUser;
use crate::services::board;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateBoardBody {
    pub name: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateBoardBody {
    pub name: String,
}

/// `GET /api/boards`: boards owned by the caller.
pub async fn list_boards_rest(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<BoardRecord>>, StatusCode> {
    let boards = board::list_boards(&state.records, auth.user_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(boards))
}

/// `POST /api/boards`: create a board, generating a room id if none is given.
pub async fn create_board_rest(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateBoardBody>,
) -> Result<(StatusCode, Json<BoardRecord>), StatusCode> {
    let record = board::create_board(&state.records, auth.user_id, &body.name, body.room_id.as_deref())
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PATCH /api/boards/{id}`: rename a board the caller owns.
pub async fn update_board_rest(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<UpdateBoardBody>,
) -> Result<Json<Value>, StatusCode> {
    board::rename_board(&state.records, board_id, auth.user_id, &body.name)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /api/boards/{id}`: delete a board the caller owns.
pub async fn delete_board_rest(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    board::delete_board(&state.records, board_id, auth.user_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/rooms/{room_id}/board`: the durable record for a room.
pub async fn get_room_board(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(room_id): Path<String>,
) -> Result<Json<BoardRecord>, StatusCode> {
    let record = board::get_board_by_room(&state.records, &room_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(record))
}

/// `PUT /api/rooms/{room_id}/board-data`: save a canvas snapshot.
pub async fn put_room_board_data(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<String>,
    Json(board_data): Json<Value>,
) -> Result<StatusCode, StatusCode> {
    board::save_board_data(&state.records, &room_id, auth.user_id, &board_data)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn board_error_to_status(err: board::BoardError) -> StatusCode {
    match err {
        board::BoardError::NotFound(_) => StatusCode::NOT_FOUND,
        board::BoardError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        board::BoardError::RoomExists(_) => StatusCode::CONFLICT,
        board::BoardError::InvalidName | board::BoardError::InvalidSnapshot(_) => StatusCode::BAD_REQUEST,
        board::BoardError::Record(e) => {
            tracing::error!(error = %e, "board record store failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
