// =============================================================================
// Matrixon Streams - Room User Data
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use matrixon_core::types::StreamPosition;
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

/// Unread counts of one user in one room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub user_id: OwnedUserId,
    pub room_id: OwnedRoomId,
    pub notification_count: u64,
    pub highlight_count: u64,
}

pub trait Data: Send + Sync {
    fn update_notification_counts(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &NotificationRecord,
    ) -> Result<()>;

    fn notification_counts(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Option<NotificationRecord>>;

    /// Count changes with `from < position <= to` for `user_id`, ascending.
    fn notifications_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, NotificationRecord)>>;

    /// Drops every user's counts for a room.
    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize>;
}
