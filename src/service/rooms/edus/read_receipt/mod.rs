// =============================================================================
// Matrixon Streams - Read Receipt Service
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

use std::{collections::BTreeMap, sync::Arc};

pub use data::{Data, ReceiptRecord};
use matrixon_core::types::StreamPosition;
use ruma::{OwnedRoomId, RoomId};
use serde_json::{json, Map, Value};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn readreceipt_update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &ReceiptRecord,
    ) -> Result<()> {
        self.db.readreceipt_update(txn, position, record)
    }

    pub fn readreceipts_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, ReceiptRecord)>> {
        self.db.readreceipts_in_range(view, from, to)
    }

    pub fn purge_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        self.db.remove_room(txn, room_id)
    }

    /// Groups receipts into one `m.receipt` event per room.
    pub fn receipt_events(
        records: impl IntoIterator<Item = ReceiptRecord>,
    ) -> BTreeMap<OwnedRoomId, Value> {
        let mut rooms: BTreeMap<OwnedRoomId, Map<String, Value>> = BTreeMap::new();
        for record in records {
            let mut receipt = json!({ "ts": record.ts });
            if let Some(thread_id) = &record.thread_id {
                receipt["thread_id"] = json!(thread_id);
            }

            let content = rooms.entry(record.room_id).or_default();
            let by_event = content
                .entry(record.event_id.to_string())
                .or_insert_with(|| json!({}));
            let by_type = &mut by_event[record.receipt_type.as_str()];
            if !by_type.is_object() {
                *by_type = json!({});
            }
            by_type[record.user_id.as_str()] = receipt;
        }

        rooms
            .into_iter()
            .map(|(room_id, content)| {
                (
                    room_id,
                    json!({ "type": "m.receipt", "content": Value::Object(content) }),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ruma::{event_id, room_id, UserId};

    use super::*;

    #[test]
    fn test_receipt_events_group_by_room() {
        let record = |room: &RoomId, user: &str, ts| ReceiptRecord {
            room_id: room.to_owned(),
            receipt_type: "m.read".to_owned(),
            user_id: UserId::parse(user).unwrap(),
            event_id: event_id!("$event").to_owned(),
            ts,
            thread_id: None,
        };
        let events = Service::receipt_events([
            record(room_id!("!a:example.org"), "@alice:example.org", 1),
            record(room_id!("!a:example.org"), "@bob:example.org", 2),
            record(room_id!("!b:example.org"), "@alice:example.org", 3),
        ]);

        assert_eq!(events.len(), 2);
        let a = &events[room_id!("!a:example.org")];
        assert_eq!(a["type"], "m.receipt");
        assert_eq!(a["content"]["$event"]["m.read"]["@bob:example.org"]["ts"], 2);
    }
}
