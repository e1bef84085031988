// =============================================================================
// Matrixon Streams - Relations Storage
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::ops::Bound;

use matrixon_core::types::StreamPosition;
use ruma::{EventId, RoomId};

use crate::{
    database::{
        abstraction::{prefix_bounds, ReadView, Transaction},
        key, prefix, trees, KeyValueDatabase,
    },
    service::{self, rooms::pdu_metadata::RelationRecord},
    utils, Error, Result,
};

fn parse(bytes: &[u8]) -> Result<RelationRecord> {
    serde_json::from_slice(bytes)
        .map_err(|_| Error::bad_database("Invalid record in relationid_relation."))
}

impl service::rooms::pdu_metadata::Data for KeyValueDatabase {
    fn add_relation(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &RelationRecord,
    ) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        txn.insert(trees::RELATIONID_RELATION, &position.to_be_bytes(), &value);
        txn.insert(
            trees::PARENT_RELATIONID,
            &key(&[record.parent.as_bytes(), &position.to_be_bytes()]),
            &value,
        );
        Ok(())
    }

    fn relations_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, RelationRecord)>> {
        view.scan(
            trees::RELATIONID_RELATION,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )?
        .into_iter()
        .map(|(position, value)| Ok((utils::u64_from_bytes(&position)?, parse(&value)?)))
        .collect()
    }

    fn children(
        &self,
        view: &dyn ReadView,
        parent: &EventId,
        before: Option<StreamPosition>,
    ) -> Result<Vec<(StreamPosition, RelationRecord)>> {
        let parent_prefix = prefix(&[parent.as_bytes()]);
        let to = match before {
            Some(position) => Bound::Excluded(key(&[parent.as_bytes(), &position.to_be_bytes()])),
            None => prefix_bounds(&parent_prefix).1,
        };
        view.scan(
            trees::PARENT_RELATIONID,
            Bound::Included(parent_prefix),
            to,
            true,
            None,
        )?
        .into_iter()
        .map(|(key, value)| {
            let position = key
                .len()
                .checked_sub(8)
                .ok_or_else(|| Error::bad_database("Invalid key in parent_relationid."))
                .and_then(|start| utils::u64_from_bytes(&key[start..]))?;
            Ok((position, parse(&value)?))
        })
        .collect()
    }

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        let mut removed = 0;
        for (position, value) in txn.scan_prefix(trees::RELATIONID_RELATION, b"", false)? {
            let record = parse(&value)?;
            if record.room_id.as_str() != room_id.as_str() {
                continue;
            }
            txn.remove(trees::RELATIONID_RELATION, &position);
            txn.remove(
                trees::PARENT_RELATIONID,
                &key(&[record.parent.as_bytes(), &position]),
            );
            removed += 1;
        }
        Ok(removed)
    }
}
