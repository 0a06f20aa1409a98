//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the durable record store and the live room map. The server never
//! holds canvas objects: replicas live in clients, and a room here is only
//! the set of connections its sync frames are relayed to.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use crate::config::Config;
use crate::db::BoardRecordStore;
use crate::frame::Frame;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Live relay state for one room.
#[derive(Default)]
pub struct RoomState {
    /// Connected clients: `connection_id` -> sender for outgoing frames.
    pub clients: HashMap<String, mpsc::Sender<Frame>>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn BoardRecordStore>,
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(records: Arc<dyn BoardRecordStore>, config: Config) -> Self {
        Self { records, rooms: Arc::new(RwLock::new(HashMap::new())), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::db::MemoryBoardStore;

    /// Create a test `AppState` backed by the in-memory record store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(Arc::new(MemoryBoardStore::new()), Config::default())
    }

    /// Serve the full router on an ephemeral local port.
    pub async fn spawn_app(state: AppState) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, crate::routes::app(state)).await;
        });
        addr
    }

    /// Register a client in `room_id` and return its receiver.
    pub async fn seed_client(state: &AppState, room_id: &str, connection_id: &str, capacity: usize) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut rooms = state.rooms.write().await;
        rooms
            .entry(room_id.to_owned())
            .or_default()
            .clients
            .insert(connection_id.to_owned(), tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_state_new_is_empty() {
        assert!(RoomState::new().clients.is_empty());
    }

    #[tokio::test]
    async fn app_state_clones_share_rooms() {
        let state = test_helpers::test_app_state();
        let clone = state.clone();
        let _rx = test_helpers::seed_client(&state, "r", "c1", 4).await;
        assert!(clone.rooms.read().await.contains_key("r"));
    }
}
