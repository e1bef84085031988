// =============================================================================
// Matrixon Streams - Relations Service
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
//   Event relations (`m.relates_to`) as a stream of its own.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{Data, RelationRecord};
use matrixon_core::types::StreamPosition;
use ruma::{EventId, RoomId};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn add_relation(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &RelationRecord,
    ) -> Result<()> {
        self.db.add_relation(txn, position, record)
    }

    pub fn relations_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, RelationRecord)>> {
        self.db.relations_in_range(view, from, to)
    }

    /// Up to `limit` children of `parent`, newest first, optionally of one
    /// relation type and older than `before`.
    pub fn relations(
        &self,
        view: &dyn ReadView,
        parent: &EventId,
        rel_type: Option<&str>,
        before: Option<StreamPosition>,
        limit: usize,
    ) -> Result<Vec<(StreamPosition, RelationRecord)>> {
        Ok(self
            .db
            .children(view, parent, before)?
            .into_iter()
            .filter(|(_, record)| rel_type.map_or(true, |kind| record.rel_type == kind))
            .take(limit)
            .collect())
    }

    pub fn purge_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        self.db.remove_room(txn, room_id)
    }
}
