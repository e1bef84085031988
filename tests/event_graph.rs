//! Event graph integration tests: accept path, topology, state forks,
//! event building, pagination and purge.

mod common;

use common::*;
use matrixon_streams::{
    service::rooms::event_handler::Outcome,
    types::{Direction, PaginationToken},
    Config, Error, PduEvent,
};
use ruma::{room_id, user_id, EventId};
use serde_json::json;

#[tokio::test]
async fn test_topology_order_follows_depth() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    let bob = user_id!("@bob:example.org");

    let create = create_room(&services, room, alice).await;
    let m1 = message(&services, room, alice, "first").await;
    let join = membership(&services, room, bob, "join").await;
    let m2 = message(&services, room, alice, "second").await;
    assert_eq!(
        [create.depth, m1.depth, join.depth, m2.depth],
        [0, 1, 2, 3]
    );

    let snapshot = services.snapshot();
    let topology = &services.rooms.topology;
    let range = topology
        .select_event_ids_in_range(&snapshot, room, 1, 3, u64::MAX, 10, true)
        .unwrap();
    assert_eq!(range.event_ids, vec![m1.event_id.clone(), join.event_id.clone(), m2.event_id.clone()]);

    let range = topology
        .select_event_ids_in_range(&snapshot, room, 1, 3, u64::MAX, 10, false)
        .unwrap();
    assert_eq!(range.event_ids, vec![m2.event_id, join.event_id, m1.event_id]);
}

#[tokio::test]
async fn test_duplicate_event_is_stored_once() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let pdu = message(&services, room, alice, "hello").await;
    let rooms = &services.rooms;
    let nid = rooms.short.event_nid(&pdu.event_id).unwrap();
    let position = services.globals.positions(&services.snapshot()).unwrap();

    let outcome = rooms
        .event_handler
        .handle_accepted_event(&services, pdu.clone(), false, None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Duplicate);
    assert_eq!(rooms.short.get_or_create_event_nid(&pdu.event_id).unwrap(), nid.unwrap());
    assert_eq!(services.globals.positions(&services.snapshot()).unwrap(), position);

    let range = rooms
        .topology
        .select_event_ids_in_range(&services.snapshot(), room, 0, u64::MAX, u64::MAX, 100, true)
        .unwrap();
    let copies = range.event_ids.iter().filter(|id| **id == pdu.event_id).count();
    assert_eq!(copies, 1);
}

#[tokio::test]
async fn test_rejected_event_moves_nothing() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let rooms = &services.rooms;
    let room_nid = rooms.short.room_nid(room).unwrap().unwrap();
    let before = rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap();
    let positions = services.sync.notifier.current_position();

    let pdu = rooms
        .builder
        .build_event(&services, room, alice, "m.room.topic", Some(""), json!({ "topic": "nope" }))
        .unwrap();
    let outcome = rooms
        .event_handler
        .handle_accepted_event(&services, pdu.clone(), true, None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Rejected);

    assert_eq!(rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap(), before);
    assert_eq!(services.sync.notifier.current_position(), positions);
    assert!(rooms.pagination.get_event(&services, &pdu.event_id).unwrap().is_none());

    // Stored all the same, so a redelivery is a duplicate
    let outcome = rooms
        .event_handler
        .handle_accepted_event(&services, pdu, true, None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Duplicate);
}

#[tokio::test]
async fn test_event_in_unknown_room_fails() {
    let services = services();
    let alice = user_id!("@alice:example.org");

    let built = services.rooms.builder.build_event(
        &services,
        room_id!("!missing:example.org"),
        alice,
        "m.room.message",
        None,
        json!({ "body": "hi" }),
    );
    assert!(matches!(built, Err(Error::NotFound(_))));

    let pdu = matrixon_streams::PduEvent::from_json(json!({
        "room_id": "!missing:example.org",
        "sender": alice,
        "origin_server_ts": 1,
        "type": "m.room.message",
        "content": { "body": "hi" },
        "depth": 1,
        "prev_events": ["$somewhere"],
    }))
    .unwrap();
    let outcome = services
        .rooms
        .event_handler
        .handle_accepted_event(&services, pdu, false, None)
        .await;
    assert!(matches!(outcome, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_forked_state_resolves_deterministically() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let rooms = &services.rooms;
    let build = |topic: &str| {
        rooms
            .builder
            .build_event(&services, room, alice, "m.room.topic", Some(""), json!({ "topic": topic }))
            .unwrap()
    };
    // Both built on the same frontier
    let one = build("one");
    let two = build("two");
    assert_eq!(one.prev_events, two.prev_events);
    assert_eq!(one.depth, two.depth);

    for pdu in [one.clone(), two.clone()] {
        let outcome = rooms
            .event_handler
            .handle_accepted_event(&services, pdu, false, None)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Accepted(_)));
    }

    let room_nid = rooms.short.room_nid(room).unwrap().unwrap();
    let info = rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap().unwrap();
    assert_eq!(info.latest_event_nids.len(), 2);

    let winner = if one.event_id > two.event_id { &one } else { &two };
    let snapshot = services.snapshot();
    let topic = rooms
        .state_event(&snapshot, info.state_snapshot_nid, "m.room.topic", "")
        .unwrap()
        .unwrap();
    assert_eq!(topic.event_id, winner.event_id);

    // The next event merges the fork
    let merge = message(&services, room, alice, "merge").await;
    assert_eq!(merge.prev_events.len(), 2);
    assert_eq!(merge.depth, one.depth + 1);
    let info = rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap().unwrap();
    assert_eq!(info.latest_event_nids.len(), 1);
}

#[tokio::test]
async fn test_builder_truncates_prev_events() {
    let mut config = config();
    config.events.max_prev_events = 2;
    let services = services_with(config);
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let rooms = &services.rooms;
    let heads: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|body| {
            rooms
                .builder
                .build_event(&services, room, alice, "m.room.message", None, json!({ "body": body }))
                .unwrap()
        })
        .collect();
    for pdu in heads {
        rooms
            .event_handler
            .handle_accepted_event(&services, pdu, false, None)
            .await
            .unwrap();
    }

    let next = rooms
        .builder
        .build_event(&services, room, alice, "m.room.message", None, json!({ "body": "d" }))
        .unwrap();
    assert_eq!(next.prev_events.len(), 2);
}

#[tokio::test]
async fn test_builder_depth_saturates() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    // A remote event claiming the greatest possible depth
    let built = services
        .rooms
        .builder
        .build_event(&services, room, alice, "m.room.message", None, json!({ "body": "deep" }))
        .unwrap();
    let mut value = serde_json::to_value(&built).unwrap();
    let object = value.as_object_mut().unwrap();
    object.remove("event_id");
    object.insert("depth".to_owned(), json!(u64::MAX));
    let deep = PduEvent::from_json(value).unwrap();
    let outcome = services
        .rooms
        .event_handler
        .handle_accepted_event(&services, deep, false, None)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Accepted(_)));

    let next = services
        .rooms
        .builder
        .build_event(&services, room, alice, "m.room.message", None, json!({ "body": "after" }))
        .unwrap();
    assert_eq!(next.depth, u64::MAX);
}

#[tokio::test]
async fn test_builder_selects_auth_events() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    let bob = user_id!("@bob:example.org");

    let create = create_room(&services, room, alice).await;
    let join = membership(&services, room, alice, "join").await;

    let pdu = services
        .rooms
        .builder
        .build_event(&services, room, alice, "m.room.message", None, json!({ "body": "hi" }))
        .unwrap();
    assert!(pdu.auth_events.contains(&create.event_id));
    assert!(pdu.auth_events.contains(&join.event_id));

    // Bob has no membership yet, so only the create event applies
    let invite = services
        .rooms
        .builder
        .build_event(&services, room, bob, "m.room.member", Some(bob.as_str()), json!({ "membership": "join" }))
        .unwrap();
    assert_eq!(invite.auth_events, vec![create.event_id]);
}

#[tokio::test]
async fn test_redaction_strips_content() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let secret = message(&services, room, alice, "secret").await;
    let redaction = send(
        &services,
        room,
        alice,
        "m.room.redaction",
        None,
        json!({ "redacts": secret.event_id }),
    )
    .await;
    assert_eq!(redaction.redacts.as_ref(), Some(&secret.event_id));

    let stored = services
        .rooms
        .pagination
        .get_event(&services, &secret.event_id)
        .unwrap()
        .unwrap();
    assert!(stored.is_redacted());
    assert_eq!(stored.content, json!({}));
}

#[tokio::test]
async fn test_messages_paginate_backwards_and_forwards() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    for i in 1..=5 {
        message(&services, room, alice, &format!("m{i}")).await;
    }
    let pagination = &services.rooms.pagination;
    let bodies = |chunk: &[serde_json::Value]| -> Vec<String> {
        chunk
            .iter()
            .map(|event| event["content"]["body"].as_str().unwrap_or(event["type"].as_str().unwrap()).to_owned())
            .collect()
    };

    let page = pagination.messages(&services, room, None, Direction::Backward, 3).unwrap();
    assert_eq!(bodies(&page.chunk), ["m5", "m4", "m3"]);
    let end: PaginationToken = page.end.unwrap().parse().unwrap();

    let page = pagination.messages(&services, room, Some(end), Direction::Backward, 3).unwrap();
    assert_eq!(bodies(&page.chunk), ["m2", "m1", "m.room.member"]);

    let end: PaginationToken = page.end.unwrap().parse().unwrap();
    let page = pagination.messages(&services, room, Some(end), Direction::Backward, 3).unwrap();
    assert_eq!(bodies(&page.chunk), ["m.room.create"]);
    assert!(page.end.is_none());

    let page = pagination.messages(&services, room, None, Direction::Forward, 4).unwrap();
    assert_eq!(bodies(&page.chunk), ["m.room.create", "m.room.member", "m1", "m2"]);

    // A sync token converts to the matching topological position
    let token = services.sync.latest_token(&services).await.unwrap();
    let page = pagination
        .messages(&services, room, Some(PaginationToken::Stream(token)), Direction::Backward, 2)
        .unwrap();
    assert_eq!(bodies(&page.chunk), ["m5", "m4"]);
}

#[tokio::test]
async fn test_context_and_relations() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let parent = message(&services, room, alice, "parent").await;
    let after = message(&services, room, alice, "after").await;
    for key in ["👍", "🎉"] {
        send(
            &services,
            room,
            alice,
            "m.reaction",
            None,
            json!({ "m.relates_to": { "rel_type": "m.annotation", "event_id": parent.event_id, "key": key } }),
        )
        .await;
    }

    let pagination = &services.rooms.pagination;
    let context = pagination.context(&services, &parent.event_id, 2).unwrap();
    assert_eq!(context.event["event_id"], json!(parent.event_id));
    assert_eq!(context.events_before.len(), 1);
    assert_eq!(context.events_after[0]["event_id"], json!(after.event_id));
    assert!(context.state.iter().any(|event| event["type"] == "m.room.create"));

    let missing = EventId::parse("$missing").unwrap();
    assert!(matches!(
        pagination.context(&services, &missing, 2),
        Err(Error::NotFound(_))
    ));

    let page = pagination
        .relations(&services, &parent.event_id, Some("m.annotation"), None, 1)
        .unwrap();
    assert_eq!(page.chunk.len(), 1);
    assert_eq!(page.chunk[0]["content"]["m.relates_to"]["key"], "🎉");
    let next = page.next_batch.unwrap();

    let page = pagination
        .relations(&services, &parent.event_id, Some("m.annotation"), Some(&next), 10)
        .unwrap();
    assert_eq!(page.chunk.len(), 1);
    assert_eq!(page.chunk[0]["content"]["m.relates_to"]["key"], "👍");
    assert!(page.next_batch.is_none());

    let none = pagination
        .relations(&services, &parent.event_id, Some("m.thread"), None, 10)
        .unwrap();
    assert!(none.chunk.is_empty());
}

#[tokio::test]
async fn test_purge_removes_room() {
    let services = services();
    let room = room_id!("!r:example.org");
    let other = room_id!("!other:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    joined_room(&services, other, alice).await;
    let gone = message(&services, room, alice, "bye").await;
    let kept = message(&services, other, alice, "stay").await;
    let positions = services.globals.positions(&services.snapshot()).unwrap();

    let stats = services.rooms.purge.purge_room(&services, room).await.unwrap();
    assert_eq!(stats.events, 3);
    assert_eq!(stats.topology_rows, 3);
    assert!(stats.snapshots > 0);

    let pagination = &services.rooms.pagination;
    assert!(pagination.get_event(&services, &gone.event_id).unwrap().is_none());
    assert!(pagination.get_event(&services, &kept.event_id).unwrap().is_some());
    let page = pagination.messages(&services, room, None, Direction::Backward, 10).unwrap();
    assert!(page.chunk.is_empty());

    let snapshot = services.snapshot();
    let joined = services.rooms.state_cache.joined_rooms(&snapshot, alice).unwrap();
    assert_eq!(joined, vec![other.to_owned()]);
    // Counters are never rolled back
    assert_eq!(services.globals.positions(&snapshot).unwrap(), positions);

    assert!(matches!(
        services.rooms.purge.purge_room(&services, room_id!("!never:example.org")).await,
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_invalid_config_is_refused() {
    let config = Config {
        server_name: String::new(),
        ..Config::default()
    };
    assert!(matches!(
        matrixon_streams::KeyValueDatabase::load_or_create(&config),
        Err(Error::BadConfig(_))
    ));
}
