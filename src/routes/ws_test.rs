use tokio::time::{Duration, timeout};

use super::*;
use crate::frame::FRAME_CODE;
use crate::state::test_helpers;

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

fn encode(frame: &Frame) -> String {
    serde_json::to_string(frame).unwrap()
}

#[tokio::test]
async fn invalid_json_replies_with_gateway_error() {
    let state = test_helpers::test_app_state();
    let mut rx_peer = test_helpers::seed_client(&state, "room", "peer", 8).await;

    let reply = process_inbound_text(&state, "room", "me", "{not json").await.unwrap();
    assert_eq!(reply.syscall, "gateway:error");
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.str_field(FRAME_CODE), Some("E_SERIALIZATION"));
    assert!(reply.str_field(frame::FRAME_MESSAGE).unwrap().starts_with("invalid frame payload"));
    assert_channel_empty(&mut rx_peer).await;
}

#[tokio::test]
async fn object_frame_is_relayed_to_peers_with_sender_stamp() {
    let state = test_helpers::test_app_state();
    let mut rx_me = test_helpers::seed_client(&state, "room", "me", 8).await;
    let mut rx_peer = test_helpers::seed_client(&state, "room", "peer", 8).await;

    // Client-supplied routing fields are overwritten.
    let sent = Frame::request(frame::OBJECT_SET, Data::new())
        .with_from("spoofed")
        .with_room_id("elsewhere")
        .with_data("id", "o1");
    assert!(process_inbound_text(&state, "room", "me", &encode(&sent)).await.is_none());

    let got = assert_channel_has_frame(&mut rx_peer).await;
    assert_eq!(got.id, sent.id);
    assert_eq!(got.syscall, frame::OBJECT_SET);
    assert_eq!(got.from.as_deref(), Some("me"));
    assert_eq!(got.room_id.as_deref(), Some("room"));
    assert_eq!(got.str_field("id"), Some("o1"));
    assert_channel_empty(&mut rx_me).await;
}

#[tokio::test]
async fn presence_frame_is_relayed() {
    let state = test_helpers::test_app_state();
    let mut rx_peer = test_helpers::seed_client(&state, "room", "peer", 8).await;

    let sent = Frame::request(frame::PRESENCE_UPDATE, Data::new()).with_data("seq", 1);
    assert!(process_inbound_text(&state, "room", "me", &encode(&sent)).await.is_none());

    let got = assert_channel_has_frame(&mut rx_peer).await;
    assert_eq!(got.syscall, frame::PRESENCE_UPDATE);
    assert_eq!(got.from.as_deref(), Some("me"));
}

#[tokio::test]
async fn unknown_prefix_is_rejected_and_not_relayed() {
    let state = test_helpers::test_app_state();
    let mut rx_peer = test_helpers::seed_client(&state, "room", "peer", 8).await;

    let sent = Frame::request("board:delete", Data::new());
    let reply = process_inbound_text(&state, "room", "me", &encode(&sent)).await.unwrap();
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.parent_id, Some(sent.id));
    assert_eq!(reply.str_field(FRAME_CODE), Some("E_UNKNOWN_SYSCALL"));
    assert_channel_empty(&mut rx_peer).await;
}

#[tokio::test]
async fn client_error_frames_are_dropped() {
    let state = test_helpers::test_app_state();
    let mut rx_peer = test_helpers::seed_client(&state, "room", "peer", 8).await;

    for syscall in [frame::OBJECT_SET, frame::PRESENCE_UPDATE] {
        let mut sent = Frame::request(syscall, Data::new()).with_data("id", "o1");
        sent.status = Status::Error;
        assert!(process_inbound_text(&state, "room", "me", &encode(&sent)).await.is_none());
    }
    assert_channel_empty(&mut rx_peer).await;
}
