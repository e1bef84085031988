// =============================================================================
// Matrixon Streams - Account Data Stream Provider
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
    service::{
        account_data::{self, AccountDataRecord},
        sync::response::SyncResponse,
    },
    Result,
};

pub struct AccountDataStreamProvider;

impl AccountDataStreamProvider {
    fn place(&self, ctx: &SyncContext<'_>, response: &mut SyncResponse, record: &AccountDataRecord) {
        let event = account_data::Service::to_event(record);
        match &record.room_id {
            Some(room_id) if ctx.is_joined(room_id) => {
                response.joined_room(room_id).account_data.events.push(event);
            }
            Some(_) => {}
            None => response.account_data.events.push(event),
        }
    }
}

#[async_trait]
impl StreamProvider for AccountDataStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::AccountData
    }

    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        for record in ctx.services.account_data.all(ctx.snapshot, ctx.user_id)? {
            self.place(ctx, response, &record);
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
        for (_, record) in ctx
            .services
            .account_data
            .changes_in_range(ctx.snapshot, ctx.user_id, from, to)?
        {
            self.place(ctx, response, &record);
        }
        Ok(to)
    }
}
