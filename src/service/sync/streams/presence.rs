// =============================================================================
// Matrixon Streams - Presence Stream Provider
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

use super::{StreamProvider, SyncContext};
use crate::{
    service::{rooms::edus::presence, sync::response::SyncResponse},
    Result,
};

/// Presence of the users sharing a room with the requester.
pub struct PresenceStreamProvider;

#[async_trait]
impl StreamProvider for PresenceStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Presence
    }

    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        self.incremental_sync(ctx, response, 0, to).await
    }

    async fn incremental_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        let services = ctx.services;
        for (_, record) in services
            .rooms
            .edus
            .presence
            .presence_in_range(ctx.snapshot, from, to)?
        {
            if services
                .rooms
                .state_cache
                .shares_room(ctx.snapshot, ctx.user_id, &record.user_id)?
            {
                response
                    .presence
                    .events
                    .push(presence::Service::to_presence_event(&record));
            }
        }
        Ok(to)
    }
}
