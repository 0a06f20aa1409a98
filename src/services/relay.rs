//! Room relay: fan-out of sync frames between a room's connections.
//!
//! DESIGN
//! ======
//! Each connection owns a bounded outbound queue. A frame from one
//! connection is pushed to every other connection's queue in arrival order,
//! so each receiver sees each sender's frames in send order (per-sender
//! FIFO). There is no ordering across senders.
//!
//! A peer whose queue is full is dropped from the room rather than skipped:
//! a replica that silently misses a mutation would never converge. Dropping
//! its sender closes the queue, the connection task exits, and the client
//! rejoins and rehydrates.

use tracing::{info, warn};

use crate::canvas::presence::left_frame;
use crate::frame::Frame;
use crate::state::AppState;

/// Register a connection in a room.
pub async fn join_room(state: &AppState, room_id: &str, connection_id: &str, tx: tokio::sync::mpsc::Sender<Frame>) {
    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(room_id.to_owned()).or_default();
    room.clients.insert(connection_id.to_owned(), tx);
    info!(%room_id, %connection_id, clients = room.clients.len(), "client joined room");
}

/// Remove a connection, tell its peers, and evict the room once empty.
pub async fn part_room(state: &AppState, room_id: &str, connection_id: &str) {
    let remaining = {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        room.clients.remove(connection_id);
        let remaining = room.clients.len();
        if remaining == 0 {
            rooms.remove(room_id);
            info!(%room_id, "evicted empty room");
        }
        remaining
    };
    info!(%room_id, %connection_id, remaining, "client left room");

    if remaining > 0 {
        let notice = left_frame(connection_id).with_room_id(room_id).with_from(connection_id);
        broadcast(state, room_id, &notice, Some(connection_id)).await;
    }
}

/// Push `frame` to every connection in the room except `exclude`.
/// Returns the number of peers it was delivered to.
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<&str>) -> usize {
    let mut delivered = 0;
    let mut dropped = Vec::new();
    {
        let rooms = state.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return 0;
        };

        for (connection_id, tx) in &room.clients {
            if exclude == Some(connection_id.as_str()) {
                continue;
            }
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                    warn!(%room_id, %connection_id, syscall = %frame.syscall, "relay queue full; disconnecting peer");
                    dropped.push(connection_id.clone());
                }
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(connection_id.clone());
                }
            }
        }
    }

    // Dropping the senders closes those queues; each connection task sees
    // `None` and runs its own `part_room`.
    if !dropped.is_empty() {
        let mut rooms = state.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            for connection_id in &dropped {
                room.clients.remove(connection_id);
            }
        }
    }

    delivered
}

/// Number of live connections in a room.
pub async fn room_size(state: &AppState, room_id: &str) -> usize {
    state.rooms.read().await.get(room_id).map_or(0, |room| room.clients.len())
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
