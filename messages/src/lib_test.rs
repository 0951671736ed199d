use super::*;
use serde_json::json;

#[test]
fn decodes_envelope_position_update() {
    let text = r#"{"type":"positionUpdate","payload":{"playerId":"player_abc","position":{"lat":61.5,"lng":23.7},"timestamp":1700000000000}}"#;
    let msg = decode(text).expect("decode");
    let Message::PositionUpdate { payload } = msg else {
        panic!("wrong variant: {msg:?}");
    };
    assert_eq!(payload.player_id, "player_abc");
    assert!((payload.position.lat - 61.5).abs() < f64::EPSILON);
    assert!((payload.position.lng - 23.7).abs() < f64::EPSILON);
    assert_eq!(payload.timestamp, 1_700_000_000_000);
}

#[test]
fn decodes_flattened_player_join() {
    let text = r#"{"type":"player_join","playerId":"player_xyz","playerData":{"position":null,"profile":{"name":"Aino"},"timestamp":42}}"#;
    let msg = decode(text).expect("decode");
    let Message::PlayerJoinEvent { player_id, player_data } = msg else {
        panic!("wrong variant: {msg:?}");
    };
    assert_eq!(player_id, "player_xyz");
    assert!(player_data.position.is_none());
    assert_eq!(player_data.profile.expect("profile").name, "Aino");
    assert_eq!(player_data.timestamp, 42);
}

#[test]
fn flag_update_uses_camel_case_field_names() {
    let msg = Message::FlagUpdate {
        flag_id: "61.500000_23.700000_7".to_owned(),
        flag_data: FlagData {
            lat: 61.5,
            lng: 23.7,
            size: 1.0,
            rotation: 15.0,
            symbol: "star".to_owned(),
            owner_id: "player_abc".to_owned(),
            timestamp: 7,
        },
    };
    let text = encode(&msg);
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["type"], "flag_update");
    assert_eq!(value["flagId"], "61.500000_23.700000_7");
    assert_eq!(value["flagData"]["ownerId"], "player_abc");
    assert!(value["flagData"].get("owner_id").is_none());
}

#[test]
fn encode_wraps_envelope_family_in_payload() {
    let msg = Message::PlayerCount { payload: CountPayload { count: 3 } };
    let value: Value = serde_json::from_str(&encode(&msg)).expect("json");
    assert_eq!(value["type"], "playerCount");
    assert_eq!(value["payload"]["count"], 3);
}

#[test]
fn unknown_type_is_its_own_error() {
    let err = decode(r#"{"type":"cosmic_ray","payload":{}}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::UnknownType(t) if t == "cosmic_ray"));
}

#[test]
fn missing_type_is_its_own_error() {
    let err = decode(r#"{"payload":{"count":1}}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::MissingType));
}

#[test]
fn malformed_json_is_a_json_error() {
    let err = decode("{not json").expect_err("should fail");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn bad_payload_on_known_type_is_a_payload_error() {
    let err = decode(r#"{"type":"playerCount","payload":{"count":"three"}}"#).expect_err("should fail");
    let CodecError::Payload { message_type, .. } = err else {
        panic!("wrong error: {err:?}");
    };
    assert_eq!(message_type, "playerCount");
}

#[test]
fn known_types_constant_matches_the_enum() {
    // A tag listed in KNOWN_TYPES must never come back as UnknownType —
    // it either decodes (payload-less types) or fails on its payload.
    for tag in KNOWN_TYPES {
        let text = format!(r#"{{"type":"{tag}"}}"#);
        match decode(&text) {
            Ok(_) | Err(CodecError::Payload { .. }) => {}
            other => panic!("tag `{tag}` is out of sync with the enum: {other:?}"),
        }
    }
}

#[test]
fn investigation_passes_extra_fields_through() {
    let text = r#"{"type":"investigationStart","payload":{"playerId":"player_a","investigation":{"id":"inv-1","zone":"crater","difficulty":3},"timestamp":5}}"#;
    let msg = decode(text).expect("decode");
    let Message::InvestigationStart { payload } = msg else {
        panic!("wrong variant: {msg:?}");
    };
    assert_eq!(payload.investigation.id, "inv-1");
    assert_eq!(payload.investigation.extra["zone"], "crater");
    assert_eq!(payload.investigation.extra["difficulty"], 3);

    let round: Value =
        serde_json::from_str(&encode(&Message::InvestigationStart { payload })).expect("json");
    assert_eq!(round["payload"]["investigation"]["difficulty"], 3);
}

#[test]
fn snapshot_payload_is_a_list() {
    let text = r#"{"type":"players_snapshot","payload":[{"playerId":"player_a","playerData":{"position":{"lat":1.0,"lng":2.0},"profile":{"name":"Cosmic Explorer"},"timestamp":9}}]}"#;
    let msg = decode(text).expect("decode");
    let Message::PlayersSnapshot { payload } = msg else {
        panic!("wrong variant: {msg:?}");
    };
    assert_eq!(payload.len(), 1);
    assert_eq!(payload[0].player_id, "player_a");
}

#[test]
fn request_game_state_has_no_payload() {
    let msg = decode(r#"{"type":"request_game_state"}"#).expect("decode");
    assert_eq!(msg, Message::RequestGameState {});
    assert_eq!(encode(&msg), r#"{"type":"request_game_state"}"#);
}

#[test]
fn wire_type_reports_the_discriminator() {
    let msg = Message::RequestFlags { requester_id: "player_a".to_owned(), timestamp: 1 };
    assert_eq!(msg.wire_type(), "request_flags");

    let msg = Message::MarkerCreate { payload: json!({"type": "flag"}) };
    assert_eq!(msg.wire_type(), "marker_create");
}
