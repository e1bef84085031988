// =============================================================================
// Matrixon Streams - Receipt Stream Provider
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
    service::{rooms::edus::read_receipt, sync::response::SyncResponse},
    Result,
};

pub struct ReceiptStreamProvider;

#[async_trait]
impl StreamProvider for ReceiptStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Receipt
    }

    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        // Only the newest receipt per (room, type, user) is kept
        self.incremental_sync(ctx, response, 0, to).await
    }

    async fn incremental_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        let records = ctx
            .services
            .rooms
            .edus
            .read_receipt
            .readreceipts_in_range(ctx.snapshot, from, to)?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| ctx.is_joined(&record.room_id));

        for (room_id, event) in read_receipt::Service::receipt_events(records) {
            response.joined_room(&room_id).ephemeral.events.push(event);
        }
        Ok(to)
    }
}
