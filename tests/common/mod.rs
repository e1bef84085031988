//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use matrixon_streams::{
    service::{rooms::event_handler::Outcome, sync::SyncResponse},
    Config, KeyValueDatabase, PduEvent, Services,
};
use ruma::{RoomId, UserId};
use serde_json::{json, Value};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    });
}

pub fn config() -> Config {
    Config {
        server_name: "example.org".to_owned(),
        ..Config::default()
    }
}

pub fn services_with(config: Config) -> Arc<Services> {
    init_tracing();
    let db = KeyValueDatabase::load_or_create(&config).unwrap();
    Services::build(db, config).unwrap()
}

pub fn services() -> Arc<Services> {
    services_with(config())
}

/// Builds an event on the room's frontier and accepts it.
pub async fn send(
    services: &Services,
    room_id: &RoomId,
    sender: &UserId,
    event_type: &str,
    state_key: Option<&str>,
    content: Value,
) -> PduEvent {
    let pdu = services
        .rooms
        .builder
        .build_event(services, room_id, sender, event_type, state_key, content)
        .unwrap();
    let outcome = services
        .rooms
        .event_handler
        .handle_accepted_event(services, pdu.clone(), false, None)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Accepted(_)), "{outcome:?}");
    pdu
}

pub async fn message(services: &Services, room_id: &RoomId, sender: &UserId, body: &str) -> PduEvent {
    send(
        services,
        room_id,
        sender,
        "m.room.message",
        None,
        json!({ "msgtype": "m.text", "body": body }),
    )
    .await
}

pub async fn membership(
    services: &Services,
    room_id: &RoomId,
    user_id: &UserId,
    membership: &str,
) -> PduEvent {
    send(
        services,
        room_id,
        user_id,
        "m.room.member",
        Some(user_id.as_str()),
        json!({ "membership": membership }),
    )
    .await
}

pub async fn create_room(services: &Services, room_id: &RoomId, creator: &UserId) -> PduEvent {
    send(
        services,
        room_id,
        creator,
        "m.room.create",
        Some(""),
        json!({ "creator": creator, "room_version": "10" }),
    )
    .await
}

/// Creates a room and joins its creator.
pub async fn joined_room(services: &Services, room_id: &RoomId, creator: &UserId) {
    create_room(services, room_id, creator).await;
    membership(services, room_id, creator, "join").await;
}

/// Event IDs in a joined room's timeline.
pub fn timeline_ids(response: &SyncResponse, room_id: &RoomId) -> Vec<String> {
    response
        .rooms
        .join
        .get(room_id)
        .map(|room| {
            room.timeline
                .events
                .iter()
                .filter_map(|event| event["event_id"].as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}
