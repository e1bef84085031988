// =============================================================================
// Matrixon Streams - Consumers
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   In-process message bus feeding upstream output into the streams. Each
//   topic is a durable ordered log; each consumer reads its topic
//   sequentially and acknowledges a message only after its own writes
//   committed, so a crash in between means the message is processed again.
//
// =============================================================================

mod client_data;
mod data;
mod key_changes;
mod notification_data;
mod presence;
mod receipts;
mod room_events;
mod send_to_device;
mod typing;

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
pub use data::Data;
use matrixon_core::config::ConsumersConfig;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

pub use self::{
    client_data::ClientDataConsumer,
    key_changes::{KeyChange, KeyChangesConsumer},
    notification_data::NotificationDataConsumer,
    presence::PresenceConsumer,
    receipts::ReceiptsConsumer,
    room_events::{NewRoomEvent, RoomEventsConsumer},
    send_to_device::{SendToDeviceConsumer, ToDeviceMessage},
    typing::{TypingConsumer, TypingUpdate},
};
use crate::{service::Services, Error, Result};

const BATCH_SIZE: usize = 100;

/// Upstream output topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    RoomEvents,
    Typing,
    Receipts,
    ClientData,
    SendToDevice,
    Presence,
    KeyChanges,
    NotificationData,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::RoomEvents,
        Topic::Typing,
        Topic::Receipts,
        Topic::ClientData,
        Topic::SendToDevice,
        Topic::Presence,
        Topic::KeyChanges,
        Topic::NotificationData,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Topic::RoomEvents => "room_events",
            Topic::Typing => "typing",
            Topic::Receipts => "receipts",
            Topic::ClientData => "client_data",
            Topic::SendToDevice => "send_to_device",
            Topic::Presence => "presence",
            Topic::KeyChanges => "key_changes",
            Topic::NotificationData => "notification_data",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.name() == s)
            .ok_or_else(|| Error::BadRequest(format!("unknown topic {s:?}")))
    }
}

/// A sequential reader of one topic.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Durable name the acknowledged offset is stored under.
    fn name(&self) -> &'static str;

    fn topic(&self) -> Topic;

    /// Handles one message. `Ok(true)` acknowledges it, `Ok(false)` and
    /// transient errors have it redelivered after a backoff. Any other
    /// error drops it.
    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool>;
}

/// One consumer per upstream producer.
pub fn all() -> Vec<Box<dyn Consumer>> {
    vec![
        Box::new(RoomEventsConsumer),
        Box::new(TypingConsumer),
        Box::new(ReceiptsConsumer),
        Box::new(ClientDataConsumer),
        Box::new(SendToDeviceConsumer),
        Box::new(PresenceConsumer),
        Box::new(KeyChangesConsumer),
        Box::new(NotificationDataConsumer),
    ]
}

pub struct Service {
    pub db: Arc<dyn Data>,
    pub config: ConsumersConfig,
    wakeups: HashMap<Topic, Notify>,
}

impl Service {
    pub fn new(db: Arc<dyn Data>, config: ConsumersConfig) -> Self {
        Self {
            db,
            config,
            wakeups: Topic::ALL.into_iter().map(|topic| (topic, Notify::new())).collect(),
        }
    }

    /// Appends a message to a topic and wakes its consumer.
    pub async fn publish(&self, services: &Services, topic: Topic, message: &impl Serialize) -> Result<u64> {
        self.publish_raw(services, topic, &serde_json::to_vec(message)?).await
    }

    /// Like [`Service::publish`] for payloads that are already encoded.
    /// Nothing checks that they are valid JSON.
    pub async fn publish_raw(&self, services: &Services, topic: Topic, payload: &[u8]) -> Result<u64> {
        let mut txn = services.begin();
        let offset = self.db.append(&mut txn, topic.name(), payload).await?;
        txn.commit()?;
        debug!("Published message {} on {}", offset, topic);

        if let Some(wakeup) = self.wakeups.get(&topic) {
            wakeup.notify_one();
        }
        Ok(offset)
    }

    async fn published(&self, topic: Topic) {
        match self.wakeups.get(&topic) {
            Some(wakeup) => wakeup.notified().await,
            None => std::future::pending().await,
        }
    }

    pub fn acked_offset(&self, services: &Services, consumer: &dyn Consumer) -> Result<u64> {
        self.db.acked_offset(&services.snapshot(), consumer.name())
    }

    /// Delivers every message the consumer has not acknowledged yet.
    /// Returns how many were acknowledged or dropped.
    pub async fn process_pending(&self, services: &Services, consumer: &dyn Consumer) -> Result<usize> {
        let mut processed = 0;
        loop {
            let batch = {
                let snapshot = services.snapshot();
                let offset = self.db.acked_offset(&snapshot, consumer.name())?;
                self.db
                    .messages_after(&snapshot, consumer.topic().name(), offset, BATCH_SIZE)?
            };
            if batch.is_empty() {
                return Ok(processed);
            }
            for (offset, payload) in batch {
                self.deliver(services, consumer, offset, &payload).await?;
                processed += 1;
            }
        }
    }

    #[tracing::instrument(skip(self, services, consumer, payload), fields(consumer = consumer.name()))]
    async fn deliver(&self, services: &Services, consumer: &dyn Consumer, offset: u64, payload: &[u8]) -> Result<()> {
        let message: Value = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed message {}: {}", offset, e);
                metrics::counter!("matrixon_consumer_dropped_total").increment(1);
                return self.ack(services, consumer, offset);
            }
        };

        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut redeliveries = 0u32;
        loop {
            match consumer.on_message(services, &message).await {
                Ok(true) => break,
                Ok(false) => debug!("Message {} not acknowledged", offset),
                Err(e) if e.is_transient() => warn!("Message {} failed, will retry: {}", offset, e),
                Err(e) => {
                    error!("Dropping message {}: {}", offset, e);
                    metrics::counter!("matrixon_consumer_dropped_total").increment(1);
                    break;
                }
            }

            if self.config.max_redeliveries > 0 && redeliveries >= self.config.max_redeliveries {
                error!("Dropping message {} after {} redeliveries", offset, redeliveries);
                metrics::counter!("matrixon_consumer_dropped_total").increment(1);
                break;
            }
            redeliveries += 1;
            metrics::counter!("matrixon_consumer_redeliveries_total").increment(1);
            tokio::time::sleep(backoff).await;
        }

        self.ack(services, consumer, offset)
    }

    fn ack(&self, services: &Services, consumer: &dyn Consumer, offset: u64) -> Result<()> {
        let mut txn = services.begin();
        self.db.ack(&mut txn, consumer.name(), offset)?;
        // One consumer per topic, so acknowledged messages are done with
        self.db.prune(&mut txn, consumer.topic().name(), offset)?;
        txn.commit()
    }
}

/// Drives one consumer until `shutdown` turns true.
pub async fn run(services: Arc<Services>, consumer: Box<dyn Consumer>, mut shutdown: watch::Receiver<bool>) {
    let bus = &services.consumers;
    info!("📥 Consumer {} reading {}", consumer.name(), consumer.topic());

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            result = bus.process_pending(&services, consumer.as_ref()) => {
                if let Err(e) = result {
                    error!("Consumer {} failed: {}", consumer.name(), e);
                    tokio::time::sleep(Duration::from_millis(bus.config.retry_backoff_ms)).await;
                    continue;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        tokio::select! {
            _ = bus.published(consumer.topic()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Consumer {} stopped", consumer.name());
}

/// Decodes a message into the type a consumer expects. A mismatch is a
/// permanent error, so the message is dropped.
fn parse<T: DeserializeOwned>(message: &Value) -> Result<T> {
    Ok(T::deserialize(message)?)
}
