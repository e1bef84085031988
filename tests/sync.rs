//! Sync integration tests: complete and incremental responses, long-poll
//! wakeups and the per-stream providers.

mod common;

use std::{collections::BTreeSet, time::Duration};

use common::*;
use matrixon_streams::{
    service::{
        consumers::{ReceiptsConsumer, SendToDeviceConsumer, ToDeviceMessage, Topic, TypingConsumer, TypingUpdate},
        rooms::edus::read_receipt::ReceiptRecord,
        sync::SyncResponse,
    },
    types::{StreamKind, StreamSet, StreamingToken},
    Services,
};
use ruma::{device_id, room_id, user_id, OwnedDeviceId, RoomId, UserId};
use serde_json::json;

async fn sync(services: &Services, user_id: &UserId, since: Option<&SyncResponse>) -> SyncResponse {
    let since = since.map(|response| response.next_batch.parse::<StreamingToken>().unwrap());
    services
        .sync
        .sync(services, user_id, device_id!("PHONE"), since, Some(Duration::ZERO))
        .await
        .unwrap()
}

fn ephemeral_types(response: &SyncResponse, room_id: &RoomId) -> Vec<String> {
    response
        .rooms
        .join
        .get(room_id)
        .map(|room| {
            room.ephemeral
                .events
                .iter()
                .filter_map(|event| event["type"].as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_complete_sync_returns_room() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    let hello = message(&services, room, alice, "hello").await;

    let response = sync(&services, alice, None).await;
    let joined = &response.rooms.join[room];
    assert_eq!(timeline_ids(&response, room).last(), Some(&hello.event_id.to_string()));
    assert!(!joined.timeline.limited);
    assert!(joined.timeline.prev_batch.as_deref().is_some_and(|token| token.starts_with('t')));

    let token: StreamingToken = response.next_batch.parse().unwrap();
    assert_eq!(token, services.sync.latest_token(&services).await.unwrap());
}

#[tokio::test]
async fn test_timeline_is_limited() {
    let mut config = config();
    config.sync.timeline_limit = 2;
    let services = services_with(config);
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    message(&services, room, alice, "one").await;
    message(&services, room, alice, "two").await;

    let response = sync(&services, alice, None).await;
    let joined = &response.rooms.join[room];
    assert_eq!(joined.timeline.events.len(), 2);
    assert!(joined.timeline.limited);
    // State left out of the timeline is delivered in the state section
    assert!(joined.state.events.iter().any(|event| event["type"] == "m.room.create"));
}

#[tokio::test]
async fn test_incremental_sync_is_additive() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;

    let first = sync(&services, alice, None).await;
    let a = message(&services, room, alice, "a").await;
    let second = sync(&services, alice, Some(&first)).await;
    let b = message(&services, room, alice, "b").await;
    let c = message(&services, room, alice, "c").await;

    let first_to_third = sync(&services, alice, Some(&first)).await;
    let second_to_third = sync(&services, alice, Some(&second)).await;

    assert_eq!(timeline_ids(&second, room), [a.event_id.to_string()]);
    assert_eq!(
        timeline_ids(&second_to_third, room),
        [b.event_id.to_string(), c.event_id.to_string()]
    );

    let whole: BTreeSet<_> = timeline_ids(&first_to_third, room).into_iter().collect();
    let split: BTreeSet<_> = timeline_ids(&second, room)
        .into_iter()
        .chain(timeline_ids(&second_to_third, room))
        .collect();
    assert_eq!(whole, split);
    assert_eq!(first_to_third.next_batch, second_to_third.next_batch);
}

#[tokio::test]
async fn test_sync_times_out_with_same_token() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    let first = sync(&services, alice, None).await;

    let since: StreamingToken = first.next_batch.parse().unwrap();
    let response = services
        .sync
        .sync(&services, alice, device_id!("PHONE"), Some(since), Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(response.is_empty());
    assert_eq!(response.next_batch, first.next_batch);
    assert_eq!(services.sync.notifier.waiter_count(), 0);
}

#[tokio::test]
async fn test_long_poll_wakes_on_new_event() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    let first = sync(&services, alice, None).await;
    let since: StreamingToken = first.next_batch.parse().unwrap();

    let waiting = {
        let services = services.clone();
        tokio::spawn(async move {
            services
                .sync
                .sync(&services, alice, device_id!("PHONE"), Some(since), Some(Duration::from_secs(10)))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    let hello = message(&services, room, alice, "hello").await;
    let response = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("sync woke up")
        .unwrap();
    assert_eq!(timeline_ids(&response, room), [hello.event_id.to_string()]);
}

#[tokio::test]
async fn test_other_rooms_do_not_wake_sync() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    let bob = user_id!("@bob:example.org");
    joined_room(&services, room, alice).await;
    let first = sync(&services, bob, None).await;
    let since: StreamingToken = first.next_batch.parse().unwrap();

    let waiting = {
        let services = services.clone();
        tokio::spawn(async move {
            services
                .sync
                .sync(&services, bob, device_id!("PHONE"), Some(since), Some(Duration::from_millis(200)))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    message(&services, room, alice, "not for bob").await;

    let response = waiting.await.unwrap();
    assert!(response.rooms.join.is_empty());
}

#[tokio::test]
async fn test_receipt_waiter_ignores_typing() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    let notifier = &services.sync.notifier;

    let since = notifier.current_position();
    let listener = notifier.listen(alice, [room.to_owned()], StreamSet::only(StreamKind::Receipt), since);

    notifier.on_new_typing(since.get(StreamKind::Typing) + 1, room);
    assert!(!listener.wait(Duration::from_millis(50)).await);

    notifier.on_new_receipt(since.get(StreamKind::Receipt) + 1, room);
    assert!(listener.wait(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_typing_and_receipts_reach_sync() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    let hello = message(&services, room, alice, "hello").await;
    let first = sync(&services, alice, None).await;
    let bus = &services.consumers;

    bus.publish(
        &services,
        Topic::Typing,
        &TypingUpdate {
            room_id: room.to_owned(),
            user_id: alice.to_owned(),
            typing: true,
            timeout_ms: 30_000,
        },
    )
    .await
    .unwrap();
    assert_eq!(bus.process_pending(&services, &TypingConsumer).await.unwrap(), 1);

    let typing = sync(&services, alice, Some(&first)).await;
    assert_eq!(ephemeral_types(&typing, room), ["m.typing"]);
    let event = &typing.rooms.join[room].ephemeral.events[0];
    assert_eq!(event["content"]["user_ids"], json!([alice]));

    bus.publish(
        &services,
        Topic::Receipts,
        &ReceiptRecord {
            room_id: room.to_owned(),
            receipt_type: "m.read".to_owned(),
            user_id: alice.to_owned(),
            event_id: hello.event_id.clone(),
            ts: 1,
            thread_id: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(bus.process_pending(&services, &ReceiptsConsumer).await.unwrap(), 1);

    let receipts = sync(&services, alice, Some(&typing)).await;
    assert_eq!(ephemeral_types(&receipts, room), ["m.receipt"]);
    let content = &receipts.rooms.join[room].ephemeral.events[0]["content"];
    assert_eq!(content[hello.event_id.as_str()]["m.read"][alice.as_str()]["ts"], 1);
}

#[tokio::test]
async fn test_invite_join_and_leave() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    let bob = user_id!("@bob:example.org");
    joined_room(&services, room, alice).await;
    let start = sync(&services, bob, None).await;
    assert!(start.rooms.invite.is_empty());

    send(
        &services,
        room,
        alice,
        "m.room.member",
        Some(bob.as_str()),
        json!({ "membership": "invite" }),
    )
    .await;
    let invited = sync(&services, bob, Some(&start)).await;
    assert!(invited.rooms.invite.contains_key(room));
    assert!(invited.rooms.join.is_empty());

    membership(&services, room, bob, "join").await;
    let joined = sync(&services, bob, Some(&invited)).await;
    assert!(joined.rooms.invite.is_empty());
    let room_state = &joined.rooms.join[room];
    // Joined inside the range: the whole current state is sent
    assert!(room_state
        .state
        .events
        .iter()
        .chain(&room_state.timeline.events)
        .any(|event| event["type"] == "m.room.create"));

    let leave = membership(&services, room, bob, "leave").await;
    let left = sync(&services, bob, Some(&joined)).await;
    assert!(left.rooms.join.is_empty());
    let timeline = &left.rooms.leave[room].timeline;
    assert_eq!(timeline.events.last().unwrap()["event_id"], json!(leave.event_id));
}

#[tokio::test]
async fn test_to_device_messages_are_delivered_once() {
    let services = services();
    let alice = user_id!("@alice:example.org");
    let bob = user_id!("@bob:example.org");
    let first = sync(&services, bob, None).await;

    services
        .consumers
        .publish(
            &services,
            Topic::SendToDevice,
            &ToDeviceMessage {
                sender: alice.to_owned(),
                user_id: bob.to_owned(),
                device_id: OwnedDeviceId::from("PHONE"),
                event_type: "m.room_key_request".to_owned(),
                content: json!({ "action": "request" }),
            },
        )
        .await
        .unwrap();
    services
        .consumers
        .process_pending(&services, &SendToDeviceConsumer)
        .await
        .unwrap();

    let delivered = sync(&services, bob, Some(&first)).await;
    assert_eq!(delivered.to_device.events.len(), 1);
    assert_eq!(delivered.to_device.events[0]["sender"], json!(alice));

    // Syncing past the message deletes it
    let again = sync(&services, bob, Some(&first)).await;
    let after = sync(&services, bob, Some(&delivered)).await;
    assert!(after.to_device.events.is_empty());
    assert_eq!(again.to_device.events.len(), 1);

    let snapshot = services.snapshot();
    let pending = services
        .users
        .get_to_device_events(&snapshot, bob, device_id!("PHONE"), 0, u64::MAX)
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_sync_token_matches_committed_state() {
    let mut config = config();
    config.sync.timeline_limit = 1;
    let services = services_with(config);
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");
    joined_room(&services, room, alice).await;
    send(&services, room, alice, "m.room.name", Some(""), json!({ "name": "A" })).await;
    message(&services, room, alice, "hello").await;

    // The next commit lands before the notifier hears about it
    let announced = services.sync.notifier.current_position();
    let renamed = send(&services, room, alice, "m.room.name", Some(""), json!({ "name": "B" })).await;
    services.sync.notifier.set_current_position(announced);

    let response = sync(&services, alice, None).await;
    let token: StreamingToken = response.next_batch.parse().unwrap();
    assert!(token.get(StreamKind::Pdu) > announced.get(StreamKind::Pdu));

    let joined = &response.rooms.join[room];
    let names: Vec<_> = joined
        .state
        .events
        .iter()
        .chain(&joined.timeline.events)
        .filter(|event| event["type"] == "m.room.name")
        .map(|event| event["event_id"].clone())
        .collect();
    assert_eq!(names, [json!(renamed.event_id)]);
}
