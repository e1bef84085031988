// =============================================================================
// Matrixon Streams - Send-To-Device Stream Provider
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
use crate::{service::sync::response::SyncResponse, Result};

/// Messages for the requesting device. They stay stored until the device
/// syncs with a token past them.
pub struct SendToDeviceStreamProvider;

#[async_trait]
impl StreamProvider for SendToDeviceStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::SendToDevice
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
        let events = ctx.services.users.get_to_device_events(
            ctx.snapshot,
            ctx.user_id,
            ctx.device_id,
            from,
            to,
        )?;
        response
            .to_device
            .events
            .extend(events.into_iter().map(|(_, event)| event));
        Ok(to)
    }
}
