// =============================================================================
// Matrixon Streams - Membership Data
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use matrixon_core::types::{Membership, StreamPosition};
use ruma::{OwnedEventId, OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

/// A user's current membership in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub membership: Membership,
    pub event_id: OwnedEventId,
    /// PDU stream position of the membership event.
    pub position: StreamPosition,
}

/// A row of the invite stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InviteRecord {
    pub room_id: OwnedRoomId,
    pub event_id: OwnedEventId,
    pub invite_event: Value,
    /// Set once the invite was answered or withdrawn.
    pub retired: bool,
}

pub trait Data: Send + Sync {
    fn set_membership(
        &self,
        txn: &mut Transaction,
        room_id: &RoomId,
        user_id: &UserId,
        record: &MembershipRecord,
    ) -> Result<()>;

    fn membership(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<MembershipRecord>>;

    fn room_members(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
    ) -> Result<Vec<(OwnedUserId, MembershipRecord)>>;

    fn rooms_for_user(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
    ) -> Result<Vec<(OwnedRoomId, MembershipRecord)>>;

    /// Writes an invite stream row and makes it the user's latest invite
    /// for the room.
    fn add_invite(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        position: StreamPosition,
        record: &InviteRecord,
    ) -> Result<()>;

    fn latest_invite(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Option<(StreamPosition, InviteRecord)>>;

    /// A user's invite rows with `from < position <= to`, ascending.
    fn invites_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, InviteRecord)>>;

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<()>;
}
