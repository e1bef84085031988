// =============================================================================
// Matrixon Streams - Room Events Consumer
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use async_trait::async_trait;
use ruma::OwnedEventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{parse, Consumer, Topic};
use crate::{
    service::{pdu::PduEvent, rooms::event_handler::Outcome, Services},
    Result,
};

/// An event the room server accepted, in room arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoomEvent {
    pub event: Value,
    #[serde(default)]
    pub rejected: bool,
    /// The room frontier upstream computed after this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event_ids: Option<Vec<OwnedEventId>>,
}

pub struct RoomEventsConsumer;

#[async_trait]
impl Consumer for RoomEventsConsumer {
    fn name(&self) -> &'static str {
        "streams_room_events"
    }

    fn topic(&self) -> Topic {
        Topic::RoomEvents
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let message: NewRoomEvent = parse(message)?;
        let pdu = PduEvent::from_json(message.event)?;
        let outcome = services
            .rooms
            .event_handler
            .handle_accepted_event(services, pdu, message.rejected, message.latest_event_ids.as_deref())
            .await?;
        if outcome == Outcome::Duplicate {
            debug!("Redelivered event was already accepted");
        }
        Ok(true)
    }
}
