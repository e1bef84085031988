//! Restart tests against a database directory.

mod common;

use common::*;
use matrixon_streams::{
    types::{StreamKind, StreamingToken},
    Config,
};
use ruma::{device_id, room_id, user_id};

fn durable_config(dir: &tempfile::TempDir) -> Config {
    Config {
        database_path: Some(dir.path().to_path_buf()),
        ..config()
    }
}

#[tokio::test]
async fn test_positions_and_rooms_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");

    let (hello, token) = {
        let services = services_with(durable_config(&dir));
        joined_room(&services, room, alice).await;
        let hello = message(&services, room, alice, "hello").await;
        let token = services.globals.positions(&services.snapshot()).unwrap();
        services.db.flush().unwrap();
        (hello, token)
    };

    let services = services_with(durable_config(&dir));
    let snapshot = services.snapshot();
    assert_eq!(services.globals.positions(&snapshot).unwrap(), token);
    assert_eq!(
        services.sync.notifier.current_position().get(StreamKind::Pdu),
        token.get(StreamKind::Pdu)
    );
    assert!(services
        .rooms
        .pagination
        .get_event(&services, &hello.event_id)
        .unwrap()
        .is_some());
    assert_eq!(
        services.rooms.state_cache.joined_rooms(&snapshot, alice).unwrap(),
        vec![room.to_owned()]
    );

    // Positions continue where they stopped
    let next = message(&services, room, alice, "again").await;
    let position = services
        .rooms
        .timeline
        .pdu_position(
            &services.snapshot(),
            services.rooms.short.event_nid(&next.event_id).unwrap().unwrap(),
        )
        .unwrap();
    assert_eq!(position, Some(token.get(StreamKind::Pdu) + 1));
}

#[tokio::test]
async fn test_old_token_syncs_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");

    let since: StreamingToken = {
        let services = services_with(durable_config(&dir));
        joined_room(&services, room, alice).await;
        let response = services
            .sync
            .sync(&services, alice, device_id!("PHONE"), None, None)
            .await
            .unwrap();
        services.db.flush().unwrap();
        response.next_batch.parse().unwrap()
    };

    let services = services_with(durable_config(&dir));
    let hello = message(&services, room, alice, "after restart").await;
    let response = services
        .sync
        .sync(
            &services,
            alice,
            device_id!("PHONE"),
            Some(since),
            Some(std::time::Duration::ZERO),
        )
        .await
        .unwrap();
    assert_eq!(timeline_ids(&response, room), [hello.event_id.to_string()]);
}
