// =============================================================================
// Matrixon Streams - Presence Data
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
use ruma::{OwnedUserId, UserId};
use serde::{Deserialize, Serialize};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: OwnedUserId,
    pub presence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    pub last_active_ts: u64,
    #[serde(default)]
    pub currently_active: bool,
}

pub trait Data: Send + Sync {
    /// Stores the user's presence at `position`, replacing the previous one.
    fn set_presence(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &PresenceRecord,
    ) -> Result<()>;

    fn get_presence(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Option<(StreamPosition, PresenceRecord)>>;

    /// Presence updates with `from < position <= to`, ascending.
    fn presence_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, PresenceRecord)>>;
}
