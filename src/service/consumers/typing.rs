// =============================================================================
// Matrixon Streams - Typing Consumer
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
use ruma::{OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse, Consumer, Topic};
use crate::{service::Services, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingUpdate {
    pub room_id: OwnedRoomId,
    pub user_id: OwnedUserId,
    pub typing: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

pub struct TypingConsumer;

#[async_trait]
impl Consumer for TypingConsumer {
    fn name(&self) -> &'static str {
        "streams_typing"
    }

    fn topic(&self) -> Topic {
        Topic::Typing
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let update: TypingUpdate = parse(message)?;
        let typing = &services.rooms.edus.typing;
        let position = if update.typing {
            Some(typing.typing_add(&update.user_id, &update.room_id, update.timeout_ms).await)
        } else {
            typing.typing_remove(&update.user_id, &update.room_id).await
        };
        if let Some(position) = position {
            services.sync.notifier.on_new_typing(position, &update.room_id);
        }
        Ok(true)
    }
}
