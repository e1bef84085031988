// =============================================================================
// Matrixon Streams - Notification Data Stream Provider
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
    service::sync::response::{SyncResponse, UnreadNotifications},
    Result,
};

/// Unread notification and highlight counts per joined room.
pub struct NotificationDataStreamProvider;

#[async_trait]
impl StreamProvider for NotificationDataStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::NotificationData
    }

    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        for room_id in ctx.joined_rooms {
            let (notification_count, highlight_count) = ctx
                .services
                .rooms
                .user
                .notification_counts(ctx.snapshot, ctx.user_id, room_id)?;
            if notification_count > 0 || highlight_count > 0 {
                response.joined_room(room_id).unread_notifications = Some(UnreadNotifications {
                    notification_count,
                    highlight_count,
                });
            }
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
            .rooms
            .user
            .notifications_in_range(ctx.snapshot, ctx.user_id, from, to)?
        {
            if ctx.is_joined(&record.room_id) {
                response.joined_room(&record.room_id).unread_notifications = Some(UnreadNotifications {
                    notification_count: record.notification_count,
                    highlight_count: record.highlight_count,
                });
            }
        }
        Ok(to)
    }
}
