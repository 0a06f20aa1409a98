//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the REST surface over durable board records and the per-room
//! websocket relay under a single Axum router.
//!
//! Authentication is external: an upstream layer resolves the session and
//! forwards the user id in the `x-user-id` header. [`AuthUser`] only parses it.

pub mod boards;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::state::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

// =============================================================================
// AUTH
// =============================================================================

/// Authenticated caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<Uuid>().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(Self { user_id })
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/boards", get(boards::list_boards_rest).post(boards::create_board_rest))
        .route(
            "/api/boards/{id}",
            patch(boards::update_board_rest).delete(boards::delete_board_rest),
        )
        .route("/api/rooms/{room_id}/board", get(boards::get_room_board))
        .route("/api/rooms/{room_id}/board-data", put(boards::put_room_board_data))
        .route("/api/rooms/{room_id}/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
