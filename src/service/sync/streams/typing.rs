// =============================================================================
// Matrixon Streams - Typing Stream Provider
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
use matrixon_core::types::{StreamKind, StreamPosition};
use ruma::RoomId;
use serde_json::{json, Value};

use super::{StreamProvider, SyncContext};
use crate::{
    database::abstraction::Snapshot,
    service::{sync::response::SyncResponse, Services},
    Result,
};

/// Typing users live in memory only, so this provider reads the typing
/// service instead of the snapshot.
pub struct TypingStreamProvider;

impl TypingStreamProvider {
    async fn typing_event(&self, ctx: &SyncContext<'_>, room_id: &RoomId) -> Value {
        let user_ids = ctx.services.rooms.edus.typing.typings_all(room_id).await;
        json!({
            "type": "m.typing",
            "content": { "user_ids": user_ids },
        })
    }
}

#[async_trait]
impl StreamProvider for TypingStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Typing
    }

    async fn latest_position(&self, services: &Services, _snapshot: &Snapshot) -> Result<StreamPosition> {
        Ok(services.rooms.edus.typing.position())
    }

    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        for room_id in ctx.joined_rooms {
            if ctx.services.rooms.edus.typing.typings_all(room_id).await.is_empty() {
                continue;
            }
            let event = self.typing_event(ctx, room_id).await;
            response.joined_room(room_id).ephemeral.events.push(event);
        }
        Ok(to)
    }

    async fn incremental_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        for room_id in ctx.joined_rooms {
            // The list is sent whole, including when it became empty
            if ctx.services.rooms.edus.typing.last_typing_update(room_id).await > from {
                let event = self.typing_event(ctx, room_id).await;
                response.joined_room(room_id).ephemeral.events.push(event);
            }
        }
        Ok(to)
    }
}
