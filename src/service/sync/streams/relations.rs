// =============================================================================
// Matrixon Streams - Relations Stream Provider
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
use serde_json::json;

use super::{StreamProvider, SyncContext};
use crate::{service::sync::response::SyncResponse, Result};

/// New relations per joined room, so clients can update aggregations
/// without refetching the parent. Nothing on a complete sync.
pub struct RelationsStreamProvider;

#[async_trait]
impl StreamProvider for RelationsStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Relations
    }

    async fn complete_sync(
        &self,
        _ctx: &SyncContext<'_>,
        _response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        Ok(to)
    }

    async fn incremental_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        for (_, record) in ctx
            .services
            .rooms
            .pdu_metadata
            .relations_in_range(ctx.snapshot, from, to)?
        {
            if !ctx.is_joined(&record.room_id) {
                continue;
            }
            response.joined_room(&record.room_id).relations.events.push(json!({
                "event_id": record.event_id,
                "rel_type": record.rel_type,
                "parent": record.parent,
            }));
        }
        Ok(to)
    }
}
