//! End-to-end sync over the websocket relay: raw frame routing, and two
//! client sessions converging through a live server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use collabcanvas::canvas::history::HistoryOutcome;
use collabcanvas::canvas::object::{CanvasObjectContent, FieldMap};
use collabcanvas::canvas::session::ClientSession;
use collabcanvas::config::Config;
use collabcanvas::db::{BoardRecordStore, MemoryBoardStore, RemoteBoardStore};
use collabcanvas::frame::{self, Data, Frame};
use collabcanvas::routes::{self, USER_ID_HEADER};
use collabcanvas::state::AppState;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// HELPERS
// =============================================================================

async fn spawn_server() -> SocketAddr {
    let state = AppState::new(Arc::new(MemoryBoardStore::new()), Config::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, routes::app(state)).await;
    });
    addr
}

async fn connect(addr: SocketAddr, room_id: &str, user_id: Uuid) -> Ws {
    let mut request = format!("ws://{addr}/api/rooms/{room_id}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(USER_ID_HEADER, HeaderValue::from_str(&user_id.to_string()).unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, frame: &Frame) {
    ws.send(Message::text(serde_json::to_string(frame).unwrap())).await.unwrap();
}

/// Next text frame, or `None` if nothing arrives within the window.
async fn recv(ws: &mut Ws, window: Duration) -> Option<Frame> {
    loop {
        let msg = timeout(window, ws.next()).await.ok()??.ok()?;
        if let Message::Text(text) = msg {
            return Some(serde_json::from_str(text.as_str()).unwrap());
        }
    }
}

async fn expect_frame(ws: &mut Ws) -> Frame {
    recv(ws, Duration::from_secs(2)).await.expect("frame receive timed out")
}

fn fields(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// A `ClientSession` wired to a live websocket by hand.
struct Client {
    session: ClientSession,
    outbound: mpsc::UnboundedReceiver<Frame>,
    ws: Ws,
}

impl Client {
    async fn connect(addr: SocketAddr, room_id: &str) -> Self {
        let user_id = Uuid::new_v4();
        let records: Arc<dyn BoardRecordStore> = Arc::new(RemoteBoardStore::new(format!("http://{addr}"), user_id));
        let (tx, outbound) = mpsc::unbounded_channel();
        let mut client = Self {
            session: ClientSession::new(records, user_id, &Config::default(), tx),
            outbound,
            ws: connect(addr, room_id, user_id).await,
        };
        let welcome = expect_frame(&mut client.ws).await;
        client.session.handle_frame(welcome).unwrap();
        client.session.join(room_id).await.unwrap();
        client
    }

    async fn push(&mut self) {
        while let Ok(frame) = self.outbound.try_recv() {
            send(&mut self.ws, &frame).await;
        }
    }

    async fn pull(&mut self) {
        while let Some(frame) = recv(&mut self.ws, Duration::from_millis(150)).await {
            self.session.handle_frame(frame).unwrap();
        }
    }

    fn field(&self, id: &str, key: &str) -> Value {
        self.session.store().get(id).unwrap().data.fields.get(key).cloned().unwrap_or(Value::Null)
    }
}

// =============================================================================
// RELAY
// =============================================================================

#[tokio::test]
async fn relay_stamps_sender_and_never_echoes() {
    let addr = spawn_server().await;
    let mut a = connect(addr, "room", Uuid::new_v4()).await;
    let mut b = connect(addr, "room", Uuid::new_v4()).await;

    let welcome_a = expect_frame(&mut a).await;
    assert_eq!(welcome_a.syscall, frame::SESSION_CONNECTED);
    let a_id = welcome_a.str_field(frame::CONNECTION_ID).unwrap().to_owned();
    assert_eq!(expect_frame(&mut b).await.syscall, frame::SESSION_CONNECTED);

    let set = Frame::request(frame::OBJECT_SET, Data::new())
        .with_data("id", "o1")
        .with_data("fields", json!({"left": 5}));
    send(&mut a, &set).await;

    let got = expect_frame(&mut b).await;
    assert_eq!(got.id, set.id);
    assert_eq!(got.from.as_deref(), Some(a_id.as_str()));
    assert_eq!(got.room_id.as_deref(), Some("room"));
    assert!(recv(&mut a, Duration::from_millis(150)).await.is_none());

    a.close(None).await.unwrap();
    let left = expect_frame(&mut b).await;
    assert_eq!(left.syscall, frame::PRESENCE_LEFT);
    assert_eq!(left.str_field(frame::CONNECTION_ID), Some(a_id.as_str()));
}

#[tokio::test]
async fn rooms_are_isolated() {
    let addr = spawn_server().await;
    let mut a = connect(addr, "one", Uuid::new_v4()).await;
    let mut b = connect(addr, "two", Uuid::new_v4()).await;
    expect_frame(&mut a).await;
    expect_frame(&mut b).await;

    send(&mut a, &Frame::request(frame::OBJECT_REMOVE, Data::new()).with_data("id", "o1")).await;
    assert!(recv(&mut b, Duration::from_millis(150)).await.is_none());
}

#[tokio::test]
async fn ws_without_user_is_unauthorized() {
    let addr = spawn_server().await;
    let request = format!("ws://{addr}/api/rooms/room/ws").into_client_request().unwrap();
    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

// =============================================================================
// CONVERGENCE
// =============================================================================

#[tokio::test]
async fn sessions_converge_through_the_relay() {
    let addr = spawn_server().await;
    let mut a = Client::connect(addr, "room").await;
    let mut b = Client::connect(addr, "room").await;

    let rect = CanvasObjectContent::new("rectangle", "o1", fields(json!({"left": 0, "top": 0})));
    a.session.add_object(rect).unwrap();
    a.push().await;
    b.pull().await;
    assert!(b.session.store().contains("o1"));

    // Concurrent edits to disjoint fields both survive.
    a.session.modify_object("o1", fields(json!({"fill": "red"}))).unwrap();
    b.session.modify_object("o1", fields(json!({"left": 10}))).unwrap();
    a.push().await;
    b.push().await;
    a.pull().await;
    b.pull().await;
    for client in [&a, &b] {
        assert_eq!(client.field("o1", "fill"), json!("red"));
        assert_eq!(client.field("o1", "left"), json!(10));
    }

    // Undo is local history but a shared effect.
    assert_eq!(a.session.undo(), HistoryOutcome::Applied);
    a.push().await;
    b.pull().await;
    assert_eq!(b.field("o1", "fill"), Value::Null);
    assert_eq!(b.field("o1", "left"), json!(10));
    assert!(!b.session.history().can_redo());

    a.session.flush_save().await.unwrap();
    let reader = RemoteBoardStore::new(format!("http://{addr}"), Uuid::new_v4());
    let record = reader.find_by_room_id("room").await.unwrap().unwrap();
    assert_eq!(record.board_data["o1"]["data"]["left"], json!(10));
}
