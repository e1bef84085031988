// =============================================================================
// Matrixon Streams - Read Receipt Data
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
use ruma::{OwnedEventId, OwnedRoomId, OwnedUserId, RoomId};
use serde::{Deserialize, Serialize};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub room_id: OwnedRoomId,
    pub receipt_type: String,
    pub user_id: OwnedUserId,
    pub event_id: OwnedEventId,
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

pub trait Data: Send + Sync {
    /// Stores the receipt at `position`, replacing the user's previous
    /// receipt of the same type in the room.
    fn readreceipt_update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &ReceiptRecord,
    ) -> Result<()>;

    /// Receipts with `from < position <= to`, ascending.
    fn readreceipts_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, ReceiptRecord)>>;

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize>;
}
