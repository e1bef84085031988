// =============================================================================
// Matrixon Streams - Device List Stream Provider
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::collections::BTreeSet;

use async_trait::async_trait;
use matrixon_core::types::{Membership, StreamKind, StreamPosition};

use super::{StreamProvider, SyncContext};
use crate::{service::sync::response::SyncResponse, Result};

/// Users whose device keys changed. A complete sync carries no device list
/// changes; clients query keys for every member on first sync.
pub struct DeviceListStreamProvider;

#[async_trait]
impl StreamProvider for DeviceListStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::DeviceList
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
        let state_cache = &ctx.services.rooms.state_cache;

        let mut changed = BTreeSet::new();
        for (_, user_id) in ctx.services.users.keys_changed(ctx.snapshot, from, to)? {
            if state_cache.shares_room(ctx.snapshot, ctx.user_id, &user_id)? {
                changed.insert(user_id);
            }
        }

        // Members of rooms the user left who no longer share any room
        let mut left = BTreeSet::new();
        for (room_id, record) in state_cache.rooms_for_user(ctx.snapshot, ctx.user_id)? {
            let just_left = matches!(record.membership, Membership::Leave | Membership::Ban)
                && record.position > from
                && record.position <= to;
            if !just_left {
                continue;
            }
            for member in state_cache.joined_members(ctx.snapshot, &room_id)? {
                if !state_cache.shares_room(ctx.snapshot, ctx.user_id, &member)? {
                    left.insert(member);
                }
            }
        }

        response.device_lists.changed.extend(changed);
        response.device_lists.left.extend(left);
        Ok(to)
    }
}
