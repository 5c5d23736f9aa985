//! Integration tests for the WebSocket presence relay.
//!
//! These tests start a real relay and connect real clients.

use std::sync::Arc;

use artboard_collab::channel::{ConnectionState, PresenceError};
use artboard_collab::client::WsConnector;
use artboard_collab::config::SyncConfig;
use artboard_collab::follow::{FollowLeader, FollowReplicator, FollowerView};
use artboard_collab::presence::{PresenceSession, SessionRegistry};
use artboard_collab::protocol::{PresenceUser, WireFrame};
use artboard_collab::server::{RelayConfig, RelayServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return its URL.
async fn start_test_relay(max_peers_per_room: usize) -> String {
    let port = free_port().await;
    let server = RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_peers_per_room,
        broadcast_capacity: 64,
    });
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("ws://127.0.0.1:{port}")
}

fn registry(url: &str, socket_id: &str) -> SessionRegistry {
    let user = PresenceUser::new(socket_id, socket_id.to_uppercase(), format!("{socket_id}@example.com"));
    SessionRegistry::new(Arc::new(WsConnector::new(url)), user, 64)
}

async fn wait_for_users(session: &PresenceSession, count: usize) {
    let reached = timeout(Duration::from_secs(2), async {
        while session.get_users_count().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "roster never reached {count}");
}

#[tokio::test]
async fn test_relay_join_handshake() {
    let url = start_test_relay(10).await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    let join = WireFrame::Join {
        room: Uuid::new_v4(),
        user: PresenceUser::new("raw", "Raw", "raw@example.com"),
    };
    tx.send(Message::Binary(join.encode().unwrap().into())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), rx.next()).await.unwrap().unwrap().unwrap();
    let Message::Binary(data) = reply else {
        panic!("expected binary frame, got {reply:?}");
    };
    match WireFrame::decode(&data).unwrap() {
        WireFrame::Roster { users } => assert_eq!(users.len(), 1),
        other => panic!("expected roster, got {other:?}"),
    }
}

#[tokio::test]
async fn test_roster_over_relay() {
    let url = start_test_relay(10).await;
    let project = Uuid::new_v4();
    let alice = registry(&url, "alice");
    let bob = registry(&url, "bob");

    let a = alice.acquire(project).await.unwrap();
    assert_eq!(a.state().await, ConnectionState::Connected);
    let b = bob.acquire(project).await.unwrap();
    assert_eq!(b.get_users_count().await, 2);
    wait_for_users(&a, 2).await;

    bob.release(project).await;
    wait_for_users(&a, 1).await;
    assert_eq!(a.get_users().await[0].socket_id, "alice");
}

#[tokio::test]
async fn test_custom_event_delivery() {
    let url = start_test_relay(10).await;
    let project = Uuid::new_v4();
    let alice = registry(&url, "alice");
    let bob = registry(&url, "bob");
    let a = alice.acquire(project).await.unwrap();
    let b = bob.acquire(project).await.unwrap();
    wait_for_users(&a, 2).await;

    let mut bob_events = b.subscribe_events();
    a.broadcast_custom_event("viewState", json!({ "columns": 4, "fitMode": true })).await.unwrap();

    let event = timeout(Duration::from_secs(2), bob_events.recv()).await.unwrap().unwrap();
    assert_eq!(event.sender, "alice");
    assert_eq!(event.name, "viewState");
    assert_eq!(event.payload, json!({ "columns": 4, "fitMode": true }));
}

#[tokio::test]
async fn test_room_capacity_enforced() {
    let url = start_test_relay(1).await;
    let project = Uuid::new_v4();
    let alice = registry(&url, "alice");
    let _a = alice.acquire(project).await.unwrap();

    let bob = registry(&url, "bob");
    let result = bob.acquire(project).await;
    assert!(matches!(result, Err(PresenceError::Transport(_))));
    assert!(bob.active_projects().await.is_empty());
}

#[tokio::test]
async fn test_follow_over_relay() {
    let url = start_test_relay(10).await;
    let project = Uuid::new_v4();
    let leader_registry = registry(&url, "leader");
    let follower_registry = registry(&url, "follower");
    let leader = leader_registry.acquire(project).await.unwrap();
    let follower = follower_registry.acquire(project).await.unwrap();
    wait_for_users(&leader, 2).await;

    let page = Uuid::new_v4();
    let lead = FollowReplicator::new(leader, FollowLeader::new(3, false), SyncConfig::default());
    lead.set_page(page).await.unwrap();
    lead.set_view_state(4, true).await.unwrap();
    lead.sample_scroll(7).await;
    lead.frame().await.unwrap();

    let mut follow = FollowReplicator::new(follower, FollowLeader::default(), SyncConfig::default());
    follow.start_following("leader").await.unwrap();

    let expected = FollowerView { page_id: Some(page), columns: Some(4), fit_mode: Some(true), scroll_index: 7 };
    let converged = timeout(Duration::from_secs(3), async {
        while follow.follower_view().await != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "follower view: {:?}", follow.follower_view().await);
}

#[tokio::test]
async fn test_frame_before_join_is_rejected() {
    let url = start_test_relay(10).await;
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    let custom = WireFrame::custom("nobody", "scrollIndex", &json!({ "index": 1 }));
    tx.send(Message::Binary(custom.encode().unwrap().into())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), rx.next()).await.unwrap().unwrap().unwrap();
    let Message::Binary(data) = reply else {
        panic!("expected binary frame, got {reply:?}");
    };
    match WireFrame::decode(&data).unwrap() {
        WireFrame::Rejected { reason } => assert!(reason.contains("before Join"), "{reason}"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_abrupt_disconnect_leaves_room() {
    let url = start_test_relay(10).await;
    let project = Uuid::new_v4();
    let alice = registry(&url, "alice");
    let a = alice.acquire(project).await.unwrap();

    // A raw peer joins and then vanishes without a close frame
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    let join = WireFrame::Join { room: project, user: PresenceUser::new("ghost", "Ghost", "ghost@example.com") };
    tx.send(Message::Binary(join.encode().unwrap().into())).await.unwrap();
    timeout(Duration::from_secs(2), rx.next()).await.unwrap().unwrap().unwrap();
    wait_for_users(&a, 2).await;
    drop((tx, rx));

    // Traffic keeps flowing towards the dead socket
    for index in 0..5 {
        a.broadcast_custom_event("scrollIndex", json!({ "index": index })).await.unwrap();
    }
    wait_for_users(&a, 1).await;
    assert_eq!(a.get_users().await[0].socket_id, "alice");
}
