// =============================================================================
// Matrixon Streams - Presence Consumer
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
use matrixon_core::types::StreamKind;
use ruma::RoomId;
use serde_json::Value;

use super::{parse, Consumer, Topic};
use crate::{
    service::{rooms::edus::presence::PresenceRecord, Services},
    Result,
};

pub struct PresenceConsumer;

#[async_trait]
impl Consumer for PresenceConsumer {
    fn name(&self) -> &'static str {
        "streams_presence"
    }

    fn topic(&self) -> Topic {
        Topic::Presence
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let record: PresenceRecord = parse(message)?;

        let mut txn = services.begin();
        let position = services.globals.advance(&mut txn, StreamKind::Presence).await?;
        services.rooms.edus.presence.set_presence(&mut txn, position, &record)?;
        txn.commit()?;

        let rooms = services
            .rooms
            .state_cache
            .joined_rooms(&services.snapshot(), &record.user_id)?;
        let rooms: Vec<&RoomId> = rooms.iter().map(|room_id| &**room_id).collect();
        services
            .sync
            .notifier
            .on_new_presence(position, &record.user_id, &rooms);
        Ok(true)
    }
}
