// =============================================================================
// Matrixon Streams - PDU Stream Provider
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Room timelines and state. Joined rooms get the newest events of the
//   range plus the state that changed in it; rooms the user joined inside
//   the range get their whole current state. Rooms left inside the range
//   show up once more in the `leave` section.
//
// =============================================================================

use std::collections::HashSet;

use async_trait::async_trait;
use matrixon_core::types::{Membership, StreamKind, StreamPosition};
use ruma::{OwnedEventId, RoomId};
use serde_json::Value;
use tracing::{error, trace};

use super::{StreamProvider, SyncContext};
use crate::{
    service::sync::response::{Events, LeftRoom, SyncResponse, Timeline},
    Error, Result,
};

pub struct PduStreamProvider;

impl PduStreamProvider {
    /// The newest events of a room in `(from, to]` and the IDs they cover.
    fn timeline(
        &self,
        ctx: &SyncContext<'_>,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<(Timeline, HashSet<OwnedEventId>)> {
        let rooms = &ctx.services.rooms;
        let (events, limited) =
            rooms
                .timeline
                .recent_room_pdus(ctx.snapshot, room_id, from, to, ctx.timeline_limit)?;

        let prev_batch = match events.first() {
            Some((_, first)) => rooms
                .topology
                .event_topology(ctx.snapshot, &first.pdu.event_id)?
                .map(|token| token.to_string()),
            None => None,
        };

        let ids = events.iter().map(|(_, event)| event.pdu.event_id.clone()).collect();
        let timeline = Timeline {
            events: events.iter().map(|(_, event)| event.pdu.to_sync_value()).collect(),
            limited,
            prev_batch,
        };
        Ok((timeline, ids))
    }

    /// Current state events published in `(since, to]`, or every current
    /// state event up to `to` when `since` is `None`. Events already in the
    /// timeline are left out.
    fn state(
        &self,
        ctx: &SyncContext<'_>,
        room_id: &RoomId,
        since: Option<StreamPosition>,
        to: StreamPosition,
        in_timeline: &HashSet<OwnedEventId>,
    ) -> Result<Vec<Value>> {
        let rooms = &ctx.services.rooms;
        let snapshot_nid = rooms.current_state_snapshot(ctx.snapshot, room_id)?;
        if snapshot_nid.is_zero() {
            return Ok(Vec::new());
        }

        let mut state = Vec::new();
        for entry in rooms.state_compressor.snapshot_entries(snapshot_nid)? {
            let included = match rooms.timeline.pdu_position(ctx.snapshot, entry.event_nid)? {
                Some(position) => position <= to && since.map_or(true, |since| position > since),
                None => since.is_none(),
            };
            if !included {
                continue;
            }
            let event = rooms.timeline.get_required(ctx.snapshot, entry.event_nid)?;
            if !in_timeline.contains(&event.pdu.event_id) {
                state.push(event.pdu.to_sync_value());
            }
        }
        Ok(state)
    }

    fn joined_room(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<()> {
        let Some(membership) = ctx
            .services
            .rooms
            .state_cache
            .membership(ctx.snapshot, room_id, ctx.user_id)?
        else {
            return Ok(());
        };
        // Joined after the token was taken; the next sync picks it up
        if membership.position > to {
            return Ok(());
        }

        let (timeline, in_timeline) = self.timeline(ctx, room_id, from, to)?;
        let state_since = (from > 0 && membership.position <= from).then_some(from);
        let state = self.state(ctx, room_id, state_since, to, &in_timeline)?;
        trace!(
            "{}: {} timeline events, {} state events",
            room_id,
            timeline.events.len(),
            state.len()
        );

        let room = response.joined_room(room_id);
        room.timeline = timeline;
        room.state = Events { events: state };
        Ok(())
    }

    /// Like [`Self::joined_room`], but a room with missing state is logged
    /// and left out instead of failing the whole response.
    fn joined_room_or_skip(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<()> {
        match self.joined_room(ctx, response, room_id, from, to) {
            Err(Error::MissingState(e)) => {
                error!("Leaving {} out of sync for {}: {}", room_id, ctx.user_id, e);
                response.rooms.join.remove(room_id);
                Ok(())
            }
            result => result,
        }
    }
}

#[async_trait]
impl StreamProvider for PduStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Pdu
    }

    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition> {
        for room_id in ctx.joined_rooms {
            self.joined_room_or_skip(ctx, response, room_id, 0, to)?;
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
            self.joined_room_or_skip(ctx, response, room_id, from, to)?;
        }

        for (room_id, record) in ctx
            .services
            .rooms
            .state_cache
            .rooms_for_user(ctx.snapshot, ctx.user_id)?
        {
            let left = matches!(record.membership, Membership::Leave | Membership::Ban);
            if !left || record.position <= from || record.position > to {
                continue;
            }
            let (timeline, _) = self.timeline(ctx, &room_id, from, record.position)?;
            response.rooms.leave.insert(
                room_id,
                LeftRoom {
                    timeline,
                    state: Events::default(),
                },
            );
        }
        Ok(to)
    }
}
