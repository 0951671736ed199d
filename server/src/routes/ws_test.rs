use super::*;
use crate::state::test_helpers;
use messages::FlagData;
use serde_json::json;
use tokio::time::{Duration, timeout};

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
async fn malformed_json_is_dropped_silently() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let replies = process_inbound_text(&state, "player_a", "{definitely not json").await;
    assert!(replies.is_empty());
    assert_no_broadcast(&mut rx_b).await;
}

#[tokio::test]
async fn unknown_type_is_dropped_silently() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let replies =
        process_inbound_text(&state, "player_a", r#"{"type":"warp_drive","payload":{}}"#).await;
    assert!(replies.is_empty());
    assert_no_broadcast(&mut rx_b).await;
}

#[tokio::test]
async fn position_update_reaches_others_but_not_sender() {
    let state = test_helpers::test_app_state();
    let mut rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"positionUpdate","payload":{"playerId":"player_a","position":{"lat":61.5,"lng":23.7},"timestamp":1}}"#;
    let replies = process_inbound_text(&state, "player_a", text).await;
    assert!(replies.is_empty());

    let Message::PositionUpdate { payload } = recv_broadcast(&mut rx_b).await else {
        panic!("expected a positionUpdate broadcast");
    };
    assert_eq!(payload.player_id, "player_a");
    assert!((payload.position.lat - 61.5).abs() < f64::EPSILON);
    assert_no_broadcast(&mut rx_a).await;

    // The roster row took the position too.
    let roster = state.roster.read().await;
    let position = roster.players["player_a"].position.expect("position");
    assert!((position.lng - 23.7).abs() < f64::EPSILON);
}

#[tokio::test]
async fn eleventh_message_in_window_is_dropped() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"zoneEntry","payload":{"zoneType":"mystery","timestamp":1}}"#;
    for _ in 0..15 {
        process_inbound_text(&state, "player_a", text).await;
    }

    let mut relayed = 0;
    while timeout(Duration::from_millis(80), rx_b.recv()).await.is_ok() {
        relayed += 1;
    }
    assert_eq!(relayed, 10, "exactly the rate limit should pass");
}

#[tokio::test]
async fn join_updates_row_and_broadcasts_both_families() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "Cosmic Explorer").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"playerJoin","payload":{"name":"Aino","position":{"lat":1.0,"lng":2.0},"timestamp":1}}"#;
    let replies = process_inbound_text(&state, "player_a", text).await;
    assert!(replies.is_empty());

    let Message::PlayerJoinEvent { player_id, player_data } = recv_broadcast(&mut rx_b).await
    else {
        panic!("expected a player_join broadcast");
    };
    assert_eq!(player_id, "player_a");
    assert_eq!(player_data.profile.expect("profile").name, "Aino");

    let Message::PlayerCount { payload } = recv_broadcast(&mut rx_b).await else {
        panic!("expected a playerCount broadcast");
    };
    assert_eq!(payload.count, 2);
}

#[tokio::test]
async fn investigation_lifecycle_round_trips_through_dispatch() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let start = r#"{"type":"investigationStart","payload":{"investigation":{"id":"inv-1","zone":"crater"},"timestamp":1}}"#;
    process_inbound_text(&state, "player_a", start).await;
    assert!(matches!(
        recv_broadcast(&mut rx_b).await,
        Message::InvestigationStart { payload }
            if payload.player_id.as_deref() == Some("player_a")
    ));
    assert_eq!(state.investigations.read().await.len(), 1);

    let complete = r#"{"type":"investigationComplete","payload":{"investigation":{"id":"inv-1"},"timestamp":2}}"#;
    process_inbound_text(&state, "player_a", complete).await;
    assert!(matches!(
        recv_broadcast(&mut rx_b).await,
        Message::InvestigationComplete { .. }
    ));
    assert!(state.investigations.read().await.is_empty());
}

#[tokio::test]
async fn flag_update_is_relayed_verbatim() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"flag_update","flagId":"1.000000_2.000000_7","flagData":{"lat":1.0,"lng":2.0,"size":1.0,"rotation":0.0,"symbol":"star","ownerId":"player_a","timestamp":7}}"#;
    process_inbound_text(&state, "player_a", text).await;

    let Message::FlagUpdate { flag_id, flag_data } = recv_broadcast(&mut rx_b).await else {
        panic!("expected a flag_update broadcast");
    };
    assert_eq!(flag_id, "1.000000_2.000000_7");
    assert_eq!(
        flag_data,
        FlagData {
            lat: 1.0,
            lng: 2.0,
            size: 1.0,
            rotation: 0.0,
            symbol: "star".to_owned(),
            owner_id: "player_a".to_owned(),
            timestamp: 7,
        }
    );
}

#[tokio::test]
async fn request_flags_is_restamped_with_the_server_identity() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"request_flags","requesterId":"spoofed","timestamp":1}"#;
    process_inbound_text(&state, "player_a", text).await;

    let Message::RequestFlags { requester_id, .. } = recv_broadcast(&mut rx_b).await else {
        panic!("expected a request_flags broadcast");
    };
    assert_eq!(requester_id, "player_a");
}

#[tokio::test]
async fn sync_steps_acks_the_sender_only() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"sync_steps","payload":{"totalSteps":11000,"sessionSteps":250,"timestamp":1}}"#;
    let replies = process_inbound_text(&state, "player_a", text).await;

    assert_eq!(replies.len(), 1);
    let Message::StepsSynced { payload } = &replies[0] else {
        panic!("expected a steps_synced ack");
    };
    assert_eq!(payload.total_steps, 11_000);
    assert!(payload.validated);
    assert_no_broadcast(&mut rx_b).await;
}

#[tokio::test]
async fn area_milestone_unlocks_base_and_notifies_peers() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "Aino").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"step_milestone","payload":{"milestoneType":"area","sessionSteps":1000,"totalSteps":11000,"timestamp":3}}"#;
    let replies = process_inbound_text(&state, "player_a", text).await;

    assert_eq!(replies.len(), 1);
    assert!(matches!(
        &replies[0],
        Message::BaseEstablishmentAvailable { payload } if payload.player_id == "player_a"
    ));

    let Message::PlayerMilestone { player_id, player_data } = recv_broadcast(&mut rx_b).await
    else {
        panic!("expected a player_milestone broadcast");
    };
    assert_eq!(player_id, "player_a");
    assert_eq!(player_data.name, "Aino");
    assert_eq!(player_data.milestone_type, "area");
}

#[tokio::test]
async fn marker_create_acks_sender_and_notifies_peers() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"marker_create","payload":{"type":"flag","position":{"lat":1.0,"lng":2.0}}}"#;
    let replies = process_inbound_text(&state, "player_a", text).await;

    assert_eq!(replies.len(), 1);
    let Message::MarkerCreated { payload } = &replies[0] else {
        panic!("expected a marker_created ack");
    };
    assert_eq!(payload.marker["playerId"], "player_a");

    let Message::MarkerAdded { payload } = recv_broadcast(&mut rx_b).await else {
        panic!("expected a marker_added broadcast");
    };
    assert_eq!(payload.player_id, "player_a");
    assert_eq!(payload.marker["type"], "flag");
}

#[tokio::test]
async fn foreign_marker_update_yields_an_error_reply() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let _rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let create = r#"{"type":"marker_create","payload":{"type":"flag"}}"#;
    let replies = process_inbound_text(&state, "player_a", create).await;
    let Message::MarkerCreated { payload } = &replies[0] else {
        panic!("expected a marker_created ack");
    };
    let marker_id = payload.marker_id.clone();

    let update = json!({
        "type": "marker_update",
        "payload": { "markerId": marker_id, "updates": { "type": "step" } },
    });
    let replies = process_inbound_text(&state, "player_b", &update.to_string()).await;
    assert!(matches!(&replies[0], Message::MarkerUpdateError { .. }));
}

#[tokio::test]
async fn request_game_state_returns_the_merged_view() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let _rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let establish = r#"{"type":"base_establish","payload":{"position":{"lat":5.0,"lng":6.0}}}"#;
    process_inbound_text(&state, "player_b", establish).await;

    let replies = process_inbound_text(&state, "player_a", r#"{"type":"request_game_state"}"#).await;
    assert_eq!(replies.len(), 1);
    let Message::GameStateSync { payload } = &replies[0] else {
        panic!("expected a game_state_sync reply");
    };
    assert_eq!(payload.player_id, "player_a");
    let markers = payload.game_state["markers"].as_array().expect("markers");
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0]["type"], "base");
}

#[tokio::test]
async fn server_bound_vocabulary_from_clients_is_ignored() {
    let state = test_helpers::test_app_state();
    let _rx_a = test_helpers::seed_player(&state, "player_a", "A").await;
    let mut rx_b = test_helpers::seed_player(&state, "player_b", "B").await;

    let text = r#"{"type":"playerCount","payload":{"count":99}}"#;
    let replies = process_inbound_text(&state, "player_a", text).await;
    assert!(replies.is_empty());
    assert_no_broadcast(&mut rx_b).await;
}
