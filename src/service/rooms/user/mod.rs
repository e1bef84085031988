// =============================================================================
// Matrixon Streams - Room User Service
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
//   Per-user notification and highlight counts, fed by the push rule
//   evaluator upstream and streamed to clients as unread counts.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{Data, NotificationRecord};
use matrixon_core::types::StreamPosition;
use ruma::{RoomId, UserId};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn update_notification_counts(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &NotificationRecord,
    ) -> Result<()> {
        self.db.update_notification_counts(txn, position, record)
    }

    /// `(notification_count, highlight_count)`, zero when nothing was recorded.
    pub fn notification_counts(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(u64, u64)> {
        Ok(self
            .db
            .notification_counts(view, user_id, room_id)?
            .map(|r| (r.notification_count, r.highlight_count))
            .unwrap_or_default())
    }

    pub fn notifications_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, NotificationRecord)>> {
        self.db.notifications_in_range(view, user_id, from, to)
    }

    pub fn purge_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        self.db.remove_room(txn, room_id)
    }
}
