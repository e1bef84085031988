// =============================================================================
// Matrixon Streams - Topology Storage
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

use matrixon_core::types::TopologyToken;
use ruma::{EventId, OwnedEventId, RoomId};

use crate::{
    database::{
        abstraction::{prefix_bounds, ReadView, Transaction},
        prefix, trees, KeyValueDatabase,
    },
    service, utils, Error, Result,
};

fn topology_key(room_id: &RoomId, token: TopologyToken) -> Vec<u8> {
    let mut key = prefix(&[room_id.as_bytes()]);
    key.extend_from_slice(&token.depth.to_be_bytes());
    key.extend_from_slice(&token.pdu_position.to_be_bytes());
    key
}

fn token_from_key(key: &[u8]) -> Result<TopologyToken> {
    let start = key
        .len()
        .checked_sub(16)
        .ok_or_else(|| Error::bad_database("Invalid key in topology_eventid."))?;
    Ok(TopologyToken::new(
        utils::u64_from_bytes(&key[start..start + 8])?,
        utils::u64_from_bytes(&key[start + 8..])?,
    ))
}

impl service::rooms::topology::Data for KeyValueDatabase {
    fn insert_topology(
        &self,
        txn: &mut Transaction,
        room_id: &RoomId,
        event_id: &EventId,
        token: TopologyToken,
    ) -> Result<bool> {
        let key = topology_key(room_id, token);
        if txn.contains(trees::EVENTID_TOPOLOGY, event_id.as_bytes())?
            || txn.contains(trees::TOPOLOGY_EVENTID, &key)?
        {
            return Ok(false);
        }
        txn.insert(trees::TOPOLOGY_EVENTID, &key, event_id.as_bytes());
        txn.insert(trees::EVENTID_TOPOLOGY, event_id.as_bytes(), &key);
        Ok(true)
    }

    fn event_topology(&self, view: &dyn ReadView, event_id: &EventId) -> Result<Option<TopologyToken>> {
        view.get(trees::EVENTID_TOPOLOGY, event_id.as_bytes())?
            .map(|key| token_from_key(&key))
            .transpose()
    }

    fn topology_range(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        from: Bound<TopologyToken>,
        to: Bound<TopologyToken>,
        backwards: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(TopologyToken, OwnedEventId)>> {
        let (room_start, room_end) = prefix_bounds(&prefix(&[room_id.as_bytes()]));
        let from = match from {
            Bound::Included(token) => Bound::Included(topology_key(room_id, token)),
            Bound::Excluded(token) => Bound::Excluded(topology_key(room_id, token)),
            Bound::Unbounded => room_start,
        };
        let to = match to {
            Bound::Included(token) => Bound::Included(topology_key(room_id, token)),
            Bound::Excluded(token) => Bound::Excluded(topology_key(room_id, token)),
            Bound::Unbounded => room_end,
        };

        view.scan(trees::TOPOLOGY_EVENTID, from, to, backwards, limit)?
            .into_iter()
            .map(|(key, event_id)| {
                let event_id = utils::string_from_bytes(&event_id)?;
                let event_id = EventId::parse(event_id)
                    .map_err(|_| Error::bad_database("Invalid event ID in topology_eventid."))?;
                Ok((token_from_key(&key)?, event_id))
            })
            .collect()
    }

    fn remove_room_topology(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        let rows = txn.scan_prefix(trees::TOPOLOGY_EVENTID, &prefix(&[room_id.as_bytes()]), false)?;
        for (key, event_id) in &rows {
            txn.remove(trees::TOPOLOGY_EVENTID, key);
            txn.remove(trees::EVENTID_TOPOLOGY, event_id);
        }
        Ok(rows.len())
    }
}
