// =============================================================================
// Matrixon Streams - Room Metadata Data
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use async_trait::async_trait;
use matrixon_core::types::{EventNid, RoomNid, StateSnapshotNid};
use ruma::RoomId;
use serde::{Deserialize, Serialize};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

/// The room row: frontier, current state and output progress.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_nid: RoomNid,
    pub room_version: String,
    pub state_snapshot_nid: StateSnapshotNid,
    pub latest_event_nids: Vec<EventNid>,
    pub last_event_sent_nid: EventNid,
}

#[async_trait]
pub trait Data: Send + Sync {
    /// Locks the room for the rest of `txn`. Works for rooms that have no row
    /// yet, so concurrent creation attempts serialize too.
    async fn lock_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<()>;

    fn room_info(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Option<RoomInfo>>;

    fn set_room_info(&self, txn: &mut Transaction, info: &RoomInfo) -> Result<()>;

    fn remove_room_info(&self, txn: &mut Transaction, room_nid: RoomNid) -> Result<()>;
}
