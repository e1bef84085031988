//! Message bus integration tests: delivery, acknowledgement, redelivery and
//! the consumer tasks.

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::*;
use matrixon_streams::{
    service::consumers::{Consumer, NewRoomEvent, RoomEventsConsumer, Topic, TypingUpdate},
    types::StreamKind,
    Error, Result, Services,
};
use ruma::{room_id, user_id};
use serde_json::{json, Value};
use tokio::sync::watch;

/// Answers with a scripted sequence, then acknowledges.
struct Scripted {
    calls: AtomicUsize,
    script: fn(usize) -> Result<bool>,
}

impl Scripted {
    fn new(script: fn(usize) -> Result<bool>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Consumer for Scripted {
    fn name(&self) -> &'static str {
        "test_scripted"
    }

    fn topic(&self) -> Topic {
        Topic::Presence
    }

    async fn on_message(&self, _services: &Services, _message: &Value) -> Result<bool> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(call)
    }
}

fn fast_retries(max_redeliveries: u32) -> Arc<Services> {
    let mut config = config();
    config.consumers.retry_backoff_ms = 1;
    config.consumers.max_redeliveries = max_redeliveries;
    services_with(config)
}

#[tokio::test]
async fn test_unacknowledged_message_is_redelivered() {
    let services = fast_retries(0);
    let consumer = Scripted::new(|call| Ok(call >= 2));
    let offset = services
        .consumers
        .publish(&services, Topic::Presence, &json!({ "n": 1 }))
        .await
        .unwrap();

    assert_eq!(services.consumers.process_pending(&services, &consumer).await.unwrap(), 1);
    assert_eq!(consumer.calls(), 3);
    assert_eq!(services.consumers.acked_offset(&services, &consumer).unwrap(), offset);

    // Nothing left
    assert_eq!(services.consumers.process_pending(&services, &consumer).await.unwrap(), 0);
    assert_eq!(consumer.calls(), 3);
}

#[tokio::test]
async fn test_transient_errors_retry_and_permanent_errors_drop() {
    let services = fast_retries(0);
    let transient = Scripted::new(|call| match call {
        0 => Err(Error::Database("connection reset".to_owned())),
        _ => Ok(true),
    });
    services
        .consumers
        .publish(&services, Topic::Presence, &json!({}))
        .await
        .unwrap();
    services.consumers.process_pending(&services, &transient).await.unwrap();
    assert_eq!(transient.calls(), 2);

    let services = fast_retries(0);
    let permanent = Scripted::new(|_| Err(Error::BadRequest("never valid".to_owned())));
    let offset = services
        .consumers
        .publish(&services, Topic::Presence, &json!({}))
        .await
        .unwrap();
    services.consumers.process_pending(&services, &permanent).await.unwrap();
    assert_eq!(permanent.calls(), 1);
    assert_eq!(services.consumers.acked_offset(&services, &permanent).unwrap(), offset);
}

#[tokio::test]
async fn test_redeliveries_are_bounded() {
    let services = fast_retries(2);
    let consumer = Scripted::new(|_| Ok(false));
    services
        .consumers
        .publish(&services, Topic::Presence, &json!({}))
        .await
        .unwrap();

    assert_eq!(services.consumers.process_pending(&services, &consumer).await.unwrap(), 1);
    assert_eq!(consumer.calls(), 3);
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let services = services();
    let bus = &services.consumers;

    bus.publish_raw(&services, Topic::RoomEvents, b"{not json").await.unwrap();
    // Valid JSON with an event ID that does not match its content
    let offset = bus
        .publish(
            &services,
            Topic::RoomEvents,
            &NewRoomEvent {
                event: json!({
                    "event_id": "$forged",
                    "room_id": "!r:example.org",
                    "sender": "@alice:example.org",
                    "origin_server_ts": 1,
                    "type": "m.room.create",
                    "content": {},
                    "depth": 0,
                }),
                rejected: false,
                latest_event_ids: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(bus.process_pending(&services, &RoomEventsConsumer).await.unwrap(), 2);
    assert_eq!(bus.acked_offset(&services, &RoomEventsConsumer).unwrap(), offset);
    assert_eq!(services.globals.position(&services.snapshot(), StreamKind::Pdu).unwrap(), 0);
}

#[tokio::test]
async fn test_room_events_are_accepted_once() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");

    let create = services
        .rooms
        .builder
        .build_event(&services, room, alice, "m.room.create", Some(""), json!({ "creator": alice }))
        .unwrap();
    let message = NewRoomEvent {
        event: serde_json::to_value(&create).unwrap(),
        rejected: false,
        latest_event_ids: Some(vec![create.event_id.clone()]),
    };
    // Published twice, as after a crash before the acknowledgement
    for _ in 0..2 {
        services
            .consumers
            .publish(&services, Topic::RoomEvents, &message)
            .await
            .unwrap();
    }

    assert_eq!(
        services.consumers.process_pending(&services, &RoomEventsConsumer).await.unwrap(),
        2
    );
    let snapshot = services.snapshot();
    assert_eq!(services.globals.position(&snapshot, StreamKind::Pdu).unwrap(), 1);
    assert!(services
        .rooms
        .pagination
        .get_event(&services, &create.event_id)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_consumer_tasks_follow_published_messages() {
    let services = services();
    let room = room_id!("!r:example.org");
    let alice = user_id!("@alice:example.org");

    let (shutdown, shutdown_rx) = watch::channel(false);
    let handles = services.start(shutdown_rx);

    let before = services.sync.notifier.current_position().get(StreamKind::Typing);
    services
        .consumers
        .publish(
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

    tokio::time::timeout(Duration::from_secs(5), async {
        while services.sync.notifier.current_position().get(StreamKind::Typing) == before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("typing consumer processed the update");
    assert_eq!(services.rooms.edus.typing.typings_all(room).await, vec![alice.to_owned()]);

    shutdown.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task stopped")
            .unwrap();
    }
}

#[test]
fn test_topic_names_round_trip() {
    for topic in Topic::ALL {
        assert_eq!(topic.name().parse::<Topic>().unwrap(), topic);
    }
    assert!("nope".parse::<Topic>().is_err());
}
