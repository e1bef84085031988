// =============================================================================
// Matrixon Streams - Membership Service
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
//   Who is in which room, kept in step with the current room state by the
//   accept path, and the invite stream.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{Data, InviteRecord, MembershipRecord};
use matrixon_core::types::{Membership, StreamPosition};
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use tracing::debug;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn update_membership(
        &self,
        txn: &mut Transaction,
        room_id: &RoomId,
        user_id: &UserId,
        record: &MembershipRecord,
    ) -> Result<()> {
        debug!("{} is now {} in {}", user_id, record.membership.as_str(), room_id);
        self.db.set_membership(txn, room_id, user_id, record)
    }

    pub fn membership(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<MembershipRecord>> {
        self.db.membership(view, room_id, user_id)
    }

    pub fn is_joined(&self, view: &dyn ReadView, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .membership(view, room_id, user_id)?
            .is_some_and(|record| record.membership == Membership::Join))
    }

    pub fn joined_members(&self, view: &dyn ReadView, room_id: &RoomId) -> Result<Vec<OwnedUserId>> {
        Ok(self
            .db
            .room_members(view, room_id)?
            .into_iter()
            .filter(|(_, record)| record.membership == Membership::Join)
            .map(|(user_id, _)| user_id)
            .collect())
    }

    pub fn rooms_for_user(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
    ) -> Result<Vec<(OwnedRoomId, MembershipRecord)>> {
        self.db.rooms_for_user(view, user_id)
    }

    pub fn joined_rooms(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Vec<OwnedRoomId>> {
        Ok(self
            .rooms_for_user(view, user_id)?
            .into_iter()
            .filter(|(_, record)| record.membership == Membership::Join)
            .map(|(room_id, _)| room_id)
            .collect())
    }

    /// Whether the two users are joined to at least one common room.
    pub fn shares_room(&self, view: &dyn ReadView, user_id: &UserId, other: &UserId) -> Result<bool> {
        if user_id == other {
            return Ok(true);
        }
        for room_id in self.joined_rooms(view, user_id)? {
            if self.is_joined(view, &room_id, other)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn add_invite(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        position: StreamPosition,
        record: &InviteRecord,
    ) -> Result<()> {
        self.db.add_invite(txn, user_id, position, record)
    }

    /// The user's invite to the room if it is still outstanding.
    pub fn pending_invite(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Option<InviteRecord>> {
        Ok(self
            .db
            .latest_invite(view, user_id, room_id)?
            .map(|(_, record)| record)
            .filter(|record| !record.retired))
    }

    /// Records at `position` that the outstanding invite was answered.
    pub fn retire_invite(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        position: StreamPosition,
        invite: InviteRecord,
    ) -> Result<()> {
        debug!("Retiring invite of {} to {}", user_id, invite.room_id);
        self.db.add_invite(
            txn,
            user_id,
            position,
            &InviteRecord {
                retired: true,
                ..invite
            },
        )
    }

    pub fn invites_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, InviteRecord)>> {
        self.db.invites_in_range(view, user_id, from, to)
    }

    pub fn purge_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<()> {
        self.db.remove_room(txn, room_id)
    }
}
