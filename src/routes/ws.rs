//! WebSocket handler: per-room sync channel relay.
//!
//! DESIGN
//! ======
//! On upgrade, assigns a connection id, registers the connection's bounded
//! queue with the room relay, and enters a `select!` loop:
//! - Incoming client frames → stamp `from`/`room_id` → relay to peers
//! - Frames from room peers → forward to client
//!
//! The relay is content-blind: `object:*` and `presence:*` frames are
//! forwarded without decoding `data`. Convergence is the replicas' job.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → join the room relay → send `session:connected` with `connection_id`
//! 2. Client sends frames → relay to peers (never echoed to the sender)
//! 3. Relay closes our queue (peer too slow) or the socket closes → exit
//! 4. `part_room` → peers receive `presence:left`

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{self, Data, ErrorCode, Frame, FrameError, Status};
use crate::routes::AuthUser;
use crate::services::relay;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/rooms/{room_id}/ws`: join a room's sync channel.
pub async fn handle_ws(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    auth: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state, room_id, auth.user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, room_id: String, user_id: Uuid) {
    let connection_id = Uuid::new_v4().to_string();

    // The relay holds the only sender, so eviction closes this queue.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.relay_client_queue);

    // Join before the welcome so nothing sent after it can miss this client.
    relay::join_room(&state, &room_id, &connection_id, client_tx).await;

    let welcome = Frame::request(frame::SESSION_CONNECTED, Data::new())
        .with_room_id(&room_id)
        .with_data(frame::CONNECTION_ID, connection_id.clone())
        .with_data("user_id", user_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        relay::part_room(&state, &room_id, &connection_id).await;
        return;
    }
    info!(%connection_id, %user_id, %room_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if let Some(reply) = process_inbound_text(&state, &room_id, &connection_id, &text).await {
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = client_rx.recv() => {
                let Some(frame) = frame else {
                    warn!(%connection_id, %room_id, "ws: relay closed queue; disconnecting");
                    break;
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    relay::part_room(&state, &room_id, &connection_id).await;
    info!(%connection_id, %room_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and relay one inbound text frame. Returns a frame for the sender
/// only when the input is rejected.
async fn process_inbound_text(state: &AppState, room_id: &str, connection_id: &str, text: &str) -> Option<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let err = FrameError::Payload(e);
            let mut reply = Frame::request("gateway:error", Data::new())
                .with_room_id(room_id)
                .with_data(frame::FRAME_CODE, err.error_code())
                .with_data(frame::FRAME_MESSAGE, err.to_string());
            reply.status = Status::Error;
            return Some(reply);
        }
    };

    // Error frames originate at the relay only.
    if req.status == Status::Error {
        warn!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: dropping client error frame");
        return None;
    }

    // The relay, not the client, decides who a frame is from and where it goes.
    req.from = Some(connection_id.to_owned());
    req.room_id = Some(room_id.to_owned());

    match req.prefix() {
        "object" | "presence" => {
            if req.prefix() == "object" {
                debug!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: relay frame");
            }
            relay::broadcast(state, room_id, &req, Some(connection_id)).await;
            None
        }
        _ => Some(req.error_from(&FrameError::UnknownSyscall(req.syscall.clone()))),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.str_field(frame::FRAME_CODE).unwrap_or("-");
        let message = frame.str_field(frame::FRAME_MESSAGE).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
