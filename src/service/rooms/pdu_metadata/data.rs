// =============================================================================
// Matrixon Streams - Relations Data
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
use ruma::{EventId, OwnedEventId, OwnedRoomId, RoomId};
use serde::{Deserialize, Serialize};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub room_id: OwnedRoomId,
    pub event_id: OwnedEventId,
    pub parent: OwnedEventId,
    pub rel_type: String,
}

pub trait Data: Send + Sync {
    fn add_relation(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &RelationRecord,
    ) -> Result<()>;

    /// Relations with `from < position <= to`, ascending.
    fn relations_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, RelationRecord)>>;

    /// Children of `parent`, newest first, strictly before `before` if given.
    fn children(
        &self,
        view: &dyn ReadView,
        parent: &EventId,
        before: Option<StreamPosition>,
    ) -> Result<Vec<(StreamPosition, RelationRecord)>>;

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize>;
}
