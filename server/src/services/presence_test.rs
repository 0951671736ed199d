use super::*;
use crate::state::test_helpers;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

fn investigation(id: &str) -> Investigation {
    serde_json::from_value(json!({ "id": id, "zone": "crater" })).expect("investigation")
}

async fn recv_broadcast(rx: &mut mpsc::Receiver<Message>) -> Message {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("broadcast receive timed out")
        .expect("broadcast channel closed unexpectedly")
}

async fn assert_no_broadcast(rx: &mut mpsc::Receiver<Message>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no broadcast"
    );
}

#[tokio::test]
async fn connect_then_disconnect_keeps_count_consistent() {
    let state = test_helpers::test_app_state();
    let (tx_a, _rx_a) = mpsc::channel(8);
    let (tx_b, _rx_b) = mpsc::channel(8);

    let a = connect(&state, tx_a).await;
    assert_eq!(a.count, 1);
    assert!(a.snapshot.is_empty());

    let b = connect(&state, tx_b).await;
    assert_eq!(b.count, 2);

    assert_eq!(disconnect(&state, &a.player_id).await, Some(1));
    assert_eq!(disconnect(&state, &b.player_id).await, Some(0));
    // Second removal of the same player is a no-op.
    assert_eq!(disconnect(&state, &b.player_id).await, None);
}

#[tokio::test]
async fn snapshot_lists_exactly_the_players_connected_before() {
    let state = test_helpers::test_app_state();
    let (tx_a, _rx_a) = mpsc::channel(8);
    let a = connect(&state, tx_a).await;
    join(&state, &a.player_id, Some("Aino"), Some(Position { lat: 61.5, lng: 23.7 })).await;

    let (tx_b, _rx_b) = mpsc::channel(8);
    let b = connect(&state, tx_b).await;

    assert_eq!(b.snapshot.len(), 1);
    let entry = &b.snapshot[0];
    assert_eq!(entry.player_id, a.player_id);
    assert_eq!(entry.player_data.profile.as_ref().expect("profile").name, "Aino");
    let position = entry.player_data.position.expect("position");
    assert!((position.lat - 61.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn disconnect_removes_owned_investigation() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let greeting = connect(&state, tx).await;

    assert!(start_investigation(&state, &greeting.player_id, investigation("inv-1")).await);
    assert_eq!(investigations(&state).await.len(), 1);

    disconnect(&state, &greeting.player_id).await;
    assert!(investigations(&state).await.is_empty());
    assert!(players(&state).await.is_empty());
}

#[tokio::test]
async fn restarting_an_investigation_replaces_the_previous_row() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let greeting = connect(&state, tx).await;

    start_investigation(&state, &greeting.player_id, investigation("inv-1")).await;
    start_investigation(&state, &greeting.player_id, investigation("inv-2")).await;

    let rows = investigations(&state).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].investigation.id, "inv-2");
    assert_eq!(rows[0].player_id, greeting.player_id);
}

#[tokio::test]
async fn complete_investigation_clears_row_and_table() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let greeting = connect(&state, tx).await;

    start_investigation(&state, &greeting.player_id, investigation("inv-1")).await;
    assert!(complete_investigation(&state, &greeting.player_id, "inv-1").await);

    assert!(investigations(&state).await.is_empty());
    let rows = players(&state).await;
    assert!(rows[0].investigation.is_none());
}

#[tokio::test]
async fn broadcast_to_others_excludes_the_origin() {
    let state = test_helpers::test_app_state();
    let mut rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let message = Message::PlayerCount { payload: messages::CountPayload { count: 2 } };
    broadcast_to_others(&state, "player_a", &message).await;

    assert_eq!(recv_broadcast(&mut rx_b).await, message);
    assert_no_broadcast(&mut rx_a).await;
}

#[tokio::test]
async fn broadcast_to_all_reaches_everyone() {
    let state = test_helpers::test_app_state();
    let mut rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let message = Message::PlayerCount { payload: messages::CountPayload { count: 2 } };
    broadcast_to_all(&state, &message).await;

    assert_eq!(recv_broadcast(&mut rx_a).await, message);
    assert_eq!(recv_broadcast(&mut rx_b).await, message);
}

#[tokio::test]
async fn idle_sweep_evicts_only_stale_players() {
    let state = test_helpers::test_app_state();
    let mut rx_fresh = test_helpers::seed_player(&state, "player_fresh", "F").await;
    let _rx_stale = test_helpers::seed_player(&state, "player_stale", "S").await;

    {
        let mut roster = state.roster.write().await;
        roster.players.get_mut("player_stale").expect("seeded").last_seen = 0;
    }

    sweep_idle(&state, 60).await;

    let rows = players(&state).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "player_fresh");

    // The survivor hears the departure and the corrected count.
    let leave = recv_broadcast(&mut rx_fresh).await;
    assert!(matches!(leave, Message::PlayerLeave { payload } if payload.player_id == "player_stale"));
    let count = recv_broadcast(&mut rx_fresh).await;
    assert!(matches!(count, Message::PlayerCount { payload } if payload.count == 1));
}

#[test]
fn generated_player_ids_have_the_wire_shape() {
    let id = generate_player_id();
    let suffix = id.strip_prefix("player_").expect("prefix");
    assert_eq!(suffix.len(), 9);
    assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    assert_ne!(generate_player_id(), id);
}
