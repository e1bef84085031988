// =============================================================================
// Matrixon Streams - Account Data Service
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{AccountDataRecord, Data};
use matrixon_core::types::StreamPosition;
use ruma::{RoomId, UserId};
use serde_json::{json, Value};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    /// Places one event in the account data of the user and removes the previous entry.
    pub fn update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &AccountDataRecord,
    ) -> Result<()> {
        self.db.update(txn, position, record)
    }

    /// Searches the account data for a specific kind.
    pub fn get(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: Option<&RoomId>,
        kind: &str,
    ) -> Result<Option<Value>> {
        Ok(self.db.get(view, user_id, room_id, kind)?.map(|record| record.content))
    }

    pub fn changes_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, AccountDataRecord)>> {
        self.db.changes_in_range(view, user_id, from, to)
    }

    pub fn all(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Vec<AccountDataRecord>> {
        self.db.all(view, user_id)
    }

    pub fn to_event(record: &AccountDataRecord) -> Value {
        json!({ "type": record.kind, "content": record.content })
    }
}
