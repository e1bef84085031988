// =============================================================================
// Matrixon Streams - Key Changes Consumer
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
use ruma::{OwnedUserId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse, Consumer, Topic};
use crate::{service::Services, Result};

/// A user's device keys changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyChange {
    pub user_id: OwnedUserId,
}

pub struct KeyChangesConsumer;

#[async_trait]
impl Consumer for KeyChangesConsumer {
    fn name(&self) -> &'static str {
        "streams_key_changes"
    }

    fn topic(&self) -> Topic {
        Topic::KeyChanges
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let change: KeyChange = parse(message)?;

        let mut txn = services.begin();
        let position = services.globals.advance(&mut txn, StreamKind::DeviceList).await?;
        services.users.mark_device_key_update(&mut txn, position, &change.user_id)?;
        txn.commit()?;

        let rooms = services
            .rooms
            .state_cache
            .joined_rooms(&services.snapshot(), &change.user_id)?;
        let rooms: Vec<&RoomId> = rooms.iter().map(|room_id| &**room_id).collect();
        services
            .sync
            .notifier
            .on_new_key_change(position, &change.user_id, &rooms);
        Ok(true)
    }
}
