// =============================================================================
// Matrixon Streams - Topology Service
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
//   Causal ordering of room events. Every sent event gets a row keyed by its
//   depth and then its PDU stream position, so a range scan yields events in
//   depth order with arrival order breaking ties.
//
// =============================================================================

mod data;

use std::{ops::Bound, sync::Arc};

pub use data::Data;
use matrixon_core::types::{Direction, StreamPosition, TopologyToken};
use ruma::{EventId, OwnedEventId, RoomId};
use tracing::debug;

use crate::{
    database::abstraction::{ReadView, Transaction},
    PduEvent, Result,
};

/// Result of a range query. Empty when nothing matched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyRange {
    pub event_ids: Vec<OwnedEventId>,
    /// Position of the first returned event.
    pub start: Option<TopologyToken>,
    /// Position of the last returned event.
    pub end: Option<TopologyToken>,
}

/// Rows read per step while looking for a cursor's depth
const SCAN_BATCH: usize = 64;

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    /// Records the event at (depth, `position`). A second insert of the same
    /// event does nothing.
    pub fn insert_event_in_topology(
        &self,
        txn: &mut Transaction,
        pdu: &PduEvent,
        position: StreamPosition,
    ) -> Result<bool> {
        let inserted = self.db.insert_topology(
            txn,
            &pdu.room_id,
            &pdu.event_id,
            TopologyToken::new(pdu.depth, position),
        )?;
        if !inserted {
            debug!("Event {} already has a topology position", pdu.event_id);
        }
        Ok(inserted)
    }

    pub fn event_topology(&self, view: &dyn ReadView, event_id: &EventId) -> Result<Option<TopologyToken>> {
        self.db.event_topology(view, event_id)
    }

    /// Events with `min_depth <= depth <= max_depth`. At `max_depth` only
    /// events up to `max_stream_pos` qualify; pass `u64::MAX` for no bound.
    ///
    /// Chronological order is ascending (depth, position), otherwise
    /// descending.
    #[allow(clippy::too_many_arguments)]
    pub fn select_event_ids_in_range(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        min_depth: u64,
        max_depth: u64,
        max_stream_pos: StreamPosition,
        limit: usize,
        chronological: bool,
    ) -> Result<TopologyRange> {
        if min_depth > max_depth || limit == 0 {
            return Ok(TopologyRange::default());
        }

        let rows = self.db.topology_range(
            view,
            room_id,
            Bound::Included(TopologyToken::new(min_depth, 0)),
            Bound::Included(TopologyToken::new(max_depth, max_stream_pos)),
            !chronological,
            Some(limit),
        )?;
        Ok(Self::to_range(rows))
    }

    fn to_range(rows: Vec<(TopologyToken, OwnedEventId)>) -> TopologyRange {
        let start = rows.first().map(|(token, _)| *token);
        let end = rows.last().map(|(token, _)| *token);
        TopologyRange {
            event_ids: rows.into_iter().map(|(_, event_id)| event_id).collect(),
            start,
            end,
        }
    }

    /// Converts an arrival cursor into a depth.
    ///
    /// Backwards it is the greatest depth among events at or before
    /// `stream_pos`, forwards the smallest depth among events at or after
    /// it. `None` if no event qualifies.
    ///
    /// Rows are walked in depth order from the matching end, one batch at a
    /// time, and the walk stops at the first qualifying event.
    pub fn stream_to_topological_position(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        stream_pos: StreamPosition,
        backward: bool,
    ) -> Result<Option<u64>> {
        let mut cursor = Bound::Unbounded;
        loop {
            let (from, to) = if backward {
                (Bound::Unbounded, cursor)
            } else {
                (cursor, Bound::Unbounded)
            };
            let rows = self
                .db
                .topology_range(view, room_id, from, to, backward, Some(SCAN_BATCH))?;

            let found = rows.iter().find(|(token, _)| {
                if backward {
                    token.pdu_position <= stream_pos
                } else {
                    token.pdu_position >= stream_pos
                }
            });
            if let Some((token, _)) = found {
                return Ok(Some(token.depth));
            }
            match rows.last() {
                Some((last, _)) if rows.len() == SCAN_BATCH => cursor = Bound::Excluded(*last),
                _ => return Ok(None),
            }
        }
    }

    /// Up to `limit` events strictly after (forward) or before (backward)
    /// `from`, in the direction of travel.
    pub fn paginate(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        from: TopologyToken,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<(TopologyToken, OwnedEventId)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        match direction {
            Direction::Forward => self.db.topology_range(
                view,
                room_id,
                Bound::Excluded(from),
                Bound::Unbounded,
                false,
                Some(limit),
            ),
            Direction::Backward => self.db.topology_range(
                view,
                room_id,
                Bound::Unbounded,
                Bound::Excluded(from),
                true,
                Some(limit),
            ),
        }
    }

    pub fn purge_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        self.db.remove_room_topology(txn, room_id)
    }
}

#[cfg(test)]
mod tests {
    use ruma::room_id;

    use super::*;
    use crate::test_utils::test_database;

    fn insert(service: &Service, txn: &mut Transaction, room_id: &RoomId, id: &str, depth: u64, position: u64) {
        let event_id = EventId::parse(id).unwrap();
        service
            .db
            .insert_topology(txn, room_id, &event_id, TopologyToken::new(depth, position))
            .unwrap();
    }

    #[test]
    fn test_same_depth_orders_by_position() {
        let db = test_database();
        let service = Service { db: db.clone() };
        let room = room_id!("!room:example.org");

        let mut txn = db.begin();
        insert(&service, &mut txn, room, "$late", 2, 9);
        insert(&service, &mut txn, room, "$early", 2, 4);
        insert(&service, &mut txn, room, "$deep", 3, 5);
        insert(&service, &mut txn, room_id!("!other:example.org"), "$other", 2, 1);
        txn.commit().unwrap();

        let snapshot = db.snapshot();
        let range = service
            .select_event_ids_in_range(&snapshot, room, 0, 3, u64::MAX, 10, true)
            .unwrap();
        let ids: Vec<_> = range.event_ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, ["$early", "$late", "$deep"]);
        assert_eq!(range.start, Some(TopologyToken::new(2, 4)));
        assert_eq!(range.end, Some(TopologyToken::new(3, 5)));

        // Position bound applies at the maximum depth only
        let range = service
            .select_event_ids_in_range(&snapshot, room, 2, 2, 5, 10, false)
            .unwrap();
        let ids: Vec<_> = range.event_ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, ["$early"]);

        let empty = service
            .select_event_ids_in_range(&snapshot, room, 7, 9, u64::MAX, 10, true)
            .unwrap();
        assert_eq!(empty, TopologyRange::default());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = test_database();
        let service = Service { db: db.clone() };
        let room = room_id!("!room:example.org");

        let mut txn = db.begin();
        insert(&service, &mut txn, room, "$a", 1, 1);
        let again = service
            .db
            .insert_topology(&mut txn, room, &EventId::parse("$a").unwrap(), TopologyToken::new(1, 2))
            .unwrap();
        assert!(!again);
        txn.commit().unwrap();

        let snapshot = db.snapshot();
        let range = service
            .select_event_ids_in_range(&snapshot, room, 0, 10, u64::MAX, 10, true)
            .unwrap();
        assert_eq!(range.event_ids.len(), 1);
    }

    #[test]
    fn test_stream_to_topological_position() {
        let db = test_database();
        let service = Service { db: db.clone() };
        let room = room_id!("!room:example.org");

        let mut txn = db.begin();
        insert(&service, &mut txn, room, "$a", 1, 10);
        insert(&service, &mut txn, room, "$b", 2, 20);
        insert(&service, &mut txn, room, "$c", 3, 30);
        txn.commit().unwrap();

        let snapshot = db.snapshot();
        let convert = |position, backward| {
            service
                .stream_to_topological_position(&snapshot, room, position, backward)
                .unwrap()
        };
        assert_eq!(convert(25, true), Some(2));
        assert_eq!(convert(25, false), Some(3));
        assert_eq!(convert(5, true), None);
        assert_eq!(convert(31, false), None);
    }

    #[test]
    fn test_stream_to_topological_position_walks_batches() {
        let db = test_database();
        let service = Service { db: db.clone() };
        let room = room_id!("!room:example.org");

        let mut txn = db.begin();
        for i in 0..150u64 {
            insert(&service, &mut txn, room, &format!("$e{i}"), i, i + 1);
        }
        // Arrived late but sits deep in the graph
        insert(&service, &mut txn, room, "$fork", 3, 500);
        txn.commit().unwrap();

        let snapshot = db.snapshot();
        let convert = |position, backward| {
            service
                .stream_to_topological_position(&snapshot, room, position, backward)
                .unwrap()
        };
        assert_eq!(convert(10, true), Some(9));
        assert_eq!(convert(140, false), Some(3));
        assert_eq!(convert(500, false), Some(3));
        assert_eq!(convert(1_000, true), Some(149));
        assert_eq!(convert(501, false), None);
    }

    #[test]
    fn test_paginate_excludes_the_cursor() {
        let db = test_database();
        let service = Service { db: db.clone() };
        let room = room_id!("!room:example.org");

        let mut txn = db.begin();
        for (i, id) in ["$a", "$b", "$c", "$d"].iter().enumerate() {
            insert(&service, &mut txn, room, id, i as u64, i as u64 + 1);
        }
        txn.commit().unwrap();

        let snapshot = db.snapshot();
        let back = service
            .paginate(&snapshot, room, TopologyToken::new(2, 3), Direction::Backward, 10)
            .unwrap();
        let ids: Vec<_> = back.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(ids, ["$b", "$a"]);

        let forward = service
            .paginate(&snapshot, room, TopologyToken::new(1, 2), Direction::Forward, 1)
            .unwrap();
        assert_eq!(forward[0].1.as_str(), "$c");
    }
}
