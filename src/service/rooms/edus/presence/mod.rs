// =============================================================================
// Matrixon Streams - Presence Service
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

pub use data::{Data, PresenceRecord};
use matrixon_core::types::StreamPosition;
use ruma::UserId;
use serde_json::{json, Value};

use crate::{
    database::abstraction::{ReadView, Transaction},
    utils, Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn set_presence(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &PresenceRecord,
    ) -> Result<()> {
        self.db.set_presence(txn, position, record)
    }

    pub fn get_presence(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Option<PresenceRecord>> {
        Ok(self.db.get_presence(view, user_id)?.map(|(_, record)| record))
    }

    pub fn presence_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, PresenceRecord)>> {
        self.db.presence_in_range(view, from, to)
    }

    /// The `m.presence` event a client receives.
    pub fn to_presence_event(record: &PresenceRecord) -> Value {
        let mut content = json!({
            "presence": record.presence,
            "last_active_ago": utils::millis_since_unix_epoch().saturating_sub(record.last_active_ts),
            "currently_active": record.currently_active,
        });
        if let Some(status_msg) = &record.status_msg {
            content["status_msg"] = json!(status_msg);
        }
        json!({
            "type": "m.presence",
            "sender": record.user_id,
            "content": content,
        })
    }
}
