// =============================================================================
// Matrixon Streams - Account Data
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
use serde_json::Value;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountDataRecord {
    pub user_id: OwnedUserId,
    /// `None` for global account data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<OwnedRoomId>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
}

pub trait Data: Send + Sync {
    /// Places one event in the account data of the user and removes the previous entry.
    fn update(&self, txn: &mut Transaction, position: StreamPosition, record: &AccountDataRecord) -> Result<()>;

    /// Searches the account data for a specific kind.
    fn get(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: Option<&RoomId>,
        kind: &str,
    ) -> Result<Option<AccountDataRecord>>;

    /// Returns all changes to the account data of `user_id` with
    /// `from < position <= to`.
    fn changes_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, AccountDataRecord)>>;

    /// Latest value of every kind, global and per room.
    fn all(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Vec<AccountDataRecord>>;
}
