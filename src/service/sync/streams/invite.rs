// =============================================================================
// Matrixon Streams - Invite Stream Provider
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use matrixon_core::types::{StreamKind, StreamPosition};

use super::{StreamProvider, SyncContext};
use crate::{
    service::sync::response::{Events, InvitedRoom, SyncResponse},
    Result,
};

/// Outstanding invites. Answered invites are dropped here; the membership
/// event that answered them reaches the client through the PDU stream.
pub struct InviteStreamProvider;

#[async_trait]
impl StreamProvider for InviteStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Invite
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
        // Rows are ascending, so the last one per room wins
        let latest: BTreeMap<_, _> = ctx
            .services
            .rooms
            .state_cache
            .invites_in_range(ctx.snapshot, ctx.user_id, from, to)?
            .into_iter()
            .map(|(_, record)| (record.room_id.clone(), record))
            .collect();

        for (room_id, record) in latest {
            if record.retired {
                response.rooms.invite.remove(&room_id);
                continue;
            }
            response.rooms.invite.insert(
                room_id,
                InvitedRoom {
                    invite_state: Events {
                        events: vec![record.invite_event],
                    },
                },
            );
        }
        Ok(to)
    }
}
