// =============================================================================
// Matrixon Streams - State Compressor Service
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
//   Room state as lists of shared state blocks.
//
//   A block is a sorted set of (type, state key) -> event entries. A snapshot
//   is a list of blocks where a later block overrides an earlier one for the
//   same tuple. Both are stored under the hash of their contents, so equal
//   state computed twice ends up in the same rows.
//
// =============================================================================

mod data;

use std::{collections::BTreeMap, sync::Arc};

pub use data::Data;
use matrixon_core::types::{
    EventNid, RoomNid, StateBlockNid, StateEntry, StateKeyTuple, StateSnapshotNid,
};
use tracing::{debug, warn};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Error, Result,
};

/// Difference between two states.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// Entries of the old state that the new state no longer has.
    pub removed: Vec<StateEntry>,
    /// Entries of the new state that the old state did not have.
    pub added: Vec<StateEntry>,
}

pub struct Service {
    pub db: Arc<dyn Data>,
    pub max_blocks_per_snapshot: usize,
}

impl Service {
    /// The blocks of a snapshot. Snapshot 0 is the empty state.
    pub fn block_nids(&self, snapshot_nid: StateSnapshotNid) -> Result<Arc<Vec<StateBlockNid>>> {
        if snapshot_nid.is_zero() {
            return Ok(Arc::default());
        }
        self.db.snapshot_blocks(snapshot_nid)?.ok_or_else(|| {
            warn!("State snapshot {} is not stored", snapshot_nid);
            Error::MissingState(format!("state snapshot {snapshot_nid} is not stored"))
        })
    }

    fn load_block(&self, block_nid: StateBlockNid) -> Result<Arc<Vec<StateEntry>>> {
        self.db.block(block_nid)?.ok_or_else(|| {
            warn!("State block {} is not stored", block_nid);
            Error::MissingState(format!("state block {block_nid} is not stored"))
        })
    }

    /// Resolves blocks to the full state, sorted by tuple.
    pub fn state_entries(&self, block_nids: &[StateBlockNid]) -> Result<Vec<StateEntry>> {
        let mut state = BTreeMap::new();
        for block_nid in block_nids {
            for entry in self.load_block(*block_nid)?.iter() {
                state.insert(entry.key, entry.event_nid);
            }
        }
        Ok(state
            .into_iter()
            .map(|(key, event_nid)| StateEntry::new(key, event_nid))
            .collect())
    }

    pub fn snapshot_entries(&self, snapshot_nid: StateSnapshotNid) -> Result<Vec<StateEntry>> {
        self.state_entries(&self.block_nids(snapshot_nid)?)
    }

    /// Looks up single tuples without resolving the whole state.
    ///
    /// Tuples that are not part of the state are left out of the result.
    pub fn state_entries_for_tuples(
        &self,
        block_nids: &[StateBlockNid],
        tuples: &[StateKeyTuple],
    ) -> Result<Vec<StateEntry>> {
        let blocks = block_nids
            .iter()
            .map(|nid| self.load_block(*nid))
            .collect::<Result<Vec<_>>>()?;

        let mut tuples = tuples.to_vec();
        tuples.sort_unstable();
        tuples.dedup();

        let mut found = Vec::new();
        for tuple in tuples {
            let entry = blocks.iter().rev().find_map(|block| {
                block
                    .binary_search_by_key(&tuple, |entry| entry.key)
                    .ok()
                    .map(|index| block[index])
            });
            found.extend(entry);
        }
        Ok(found)
    }

    /// Builds the snapshot of `base_block_nids` with `new_entries` applied.
    ///
    /// When several new entries share a tuple the last one wins. Entries the
    /// base state already holds are skipped. The remaining ones become one new
    /// block appended to the list. Lists longer than
    /// `max_blocks_per_snapshot` are compacted into a single block.
    pub fn add_state(
        &self,
        room_nid: RoomNid,
        base_block_nids: &[StateBlockNid],
        new_entries: &[StateEntry],
    ) -> Result<StateSnapshotNid> {
        let mut changed: BTreeMap<StateKeyTuple, EventNid> = new_entries
            .iter()
            .map(|entry| (entry.key, entry.event_nid))
            .collect();

        let tuples: Vec<_> = changed.keys().copied().collect();
        for existing in self.state_entries_for_tuples(base_block_nids, &tuples)? {
            if changed.get(&existing.key) == Some(&existing.event_nid) {
                changed.remove(&existing.key);
            }
        }

        let mut block_nids = base_block_nids.to_vec();
        if !changed.is_empty() {
            let entries: Vec<_> = changed
                .into_iter()
                .map(|(key, event_nid)| StateEntry::new(key, event_nid))
                .collect();
            let block_nid = self.db.insert_block(&entries)?;
            block_nids.retain(|nid| *nid != block_nid);
            block_nids.push(block_nid);
        }

        if block_nids.len() > self.max_blocks_per_snapshot {
            let merged = self.state_entries(&block_nids)?;
            debug!(
                "Compacting {} state blocks ({} entries) of room {}",
                block_nids.len(),
                merged.len(),
                room_nid
            );
            block_nids = vec![self.db.insert_block(&merged)?];
        }

        if block_nids.is_empty() {
            return Ok(StateSnapshotNid::default());
        }
        self.db.insert_snapshot(room_nid, &block_nids)
    }

    pub fn diff(&self, old: StateSnapshotNid, new: StateSnapshotNid) -> Result<StateDiff> {
        if old == new {
            return Ok(StateDiff::default());
        }
        let old_entries = self.snapshot_entries(old)?;
        let new_entries = self.snapshot_entries(new)?;

        let removed = old_entries
            .iter()
            .filter(|entry| new_entries.binary_search(entry).is_err())
            .copied()
            .collect();
        let added = new_entries
            .iter()
            .filter(|entry| old_entries.binary_search(entry).is_err())
            .copied()
            .collect();
        Ok(StateDiff { removed, added })
    }

    /// Removes every snapshot of a room and returns them. Blocks may be
    /// shared with other rooms and stay.
    ///
    /// Call [`Self::forget_snapshots`] with the result once `txn` has
    /// committed.
    pub fn purge_room(&self, txn: &mut Transaction, room_nid: RoomNid) -> Result<Vec<StateSnapshotNid>> {
        let snapshots = self.db.room_snapshots(&*txn, room_nid)?;
        for snapshot_nid in &snapshots {
            self.db.remove_snapshot(txn, room_nid, *snapshot_nid)?;
        }
        Ok(snapshots)
    }

    pub fn forget_snapshots(&self, snapshot_nids: &[StateSnapshotNid]) {
        self.db.forget_snapshots(snapshot_nids);
    }

    pub fn room_snapshots(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Vec<StateSnapshotNid>> {
        self.db.room_snapshots(view, room_nid)
    }
}

#[cfg(test)]
mod tests {
    use matrixon_core::types::{EventStateKeyNid, EventTypeNid};

    use super::*;
    use crate::test_utils::test_database;

    fn service(max_blocks_per_snapshot: usize) -> Service {
        Service {
            db: test_database(),
            max_blocks_per_snapshot,
        }
    }

    fn entry(event_type: u64, state_key: u64, event: u64) -> StateEntry {
        StateEntry::new(
            StateKeyTuple::new(EventTypeNid(event_type), EventStateKeyNid(state_key)),
            EventNid(event),
        )
    }

    #[test]
    fn test_identical_state_shares_a_snapshot() {
        let service = service(16);
        let room = RoomNid(1);
        let entries = [entry(1, 1, 10), entry(2, 1, 11)];

        let first = service.add_state(room, &[], &entries).unwrap();
        let second = service.add_state(room, &[], &entries).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_zero());

        let other = service.add_state(room, &[], &[entry(1, 1, 10), entry(2, 1, 12)]).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_empty_state_is_snapshot_zero() {
        let service = service(16);
        assert!(service.add_state(RoomNid(1), &[], &[]).unwrap().is_zero());
        assert!(service.snapshot_entries(StateSnapshotNid(0)).unwrap().is_empty());
    }

    #[test]
    fn test_later_block_wins() {
        let service = service(16);
        let room = RoomNid(1);
        let base = service.add_state(room, &[], &[entry(1, 1, 10), entry(2, 2, 20)]).unwrap();
        let base_blocks = service.block_nids(base).unwrap();

        let next = service.add_state(room, &base_blocks, &[entry(1, 1, 30)]).unwrap();
        assert_eq!(service.block_nids(next).unwrap().len(), 2);
        assert_eq!(
            service.snapshot_entries(next).unwrap(),
            vec![entry(1, 1, 30), entry(2, 2, 20)]
        );

        let blocks = service.block_nids(next).unwrap();
        let found = service
            .state_entries_for_tuples(&blocks, &[entry(1, 1, 0).key, entry(9, 9, 0).key])
            .unwrap();
        assert_eq!(found, vec![entry(1, 1, 30)]);
    }

    #[test]
    fn test_duplicate_new_entries_last_wins() {
        let service = service(16);
        let snapshot = service
            .add_state(RoomNid(1), &[], &[entry(1, 1, 10), entry(1, 1, 11)])
            .unwrap();
        assert_eq!(service.snapshot_entries(snapshot).unwrap(), vec![entry(1, 1, 11)]);
    }

    #[test]
    fn test_unchanged_state_keeps_the_snapshot() {
        let service = service(16);
        let room = RoomNid(1);
        let base = service.add_state(room, &[], &[entry(1, 1, 10)]).unwrap();
        let blocks = service.block_nids(base).unwrap();
        assert_eq!(service.add_state(room, &blocks, &[entry(1, 1, 10)]).unwrap(), base);
    }

    #[test]
    fn test_compaction() {
        let service = service(3);
        let room = RoomNid(1);
        let mut snapshot = StateSnapshotNid(0);
        for i in 1..=4 {
            let blocks = service.block_nids(snapshot).unwrap();
            snapshot = service.add_state(room, &blocks, &[entry(1, i, i * 10)]).unwrap();
        }
        assert_eq!(service.block_nids(snapshot).unwrap().len(), 1);
        assert_eq!(service.snapshot_entries(snapshot).unwrap().len(), 4);
    }

    #[test]
    fn test_diff() {
        let service = service(16);
        let room = RoomNid(1);
        let old = service.add_state(room, &[], &[entry(1, 1, 10), entry(2, 2, 20)]).unwrap();
        let blocks = service.block_nids(old).unwrap();
        let new = service
            .add_state(room, &blocks, &[entry(2, 2, 21), entry(3, 3, 30)])
            .unwrap();

        let diff = service.diff(old, new).unwrap();
        assert_eq!(diff.removed, vec![entry(2, 2, 20)]);
        assert_eq!(diff.added, vec![entry(2, 2, 21), entry(3, 3, 30)]);
        assert_eq!(service.diff(new, new).unwrap(), StateDiff::default());
    }

    #[test]
    fn test_purged_snapshot_is_not_served_from_cache() {
        let db = test_database();
        let service = Service {
            db: db.clone(),
            max_blocks_per_snapshot: 16,
        };
        let room = RoomNid(1);
        let snapshot = service.add_state(room, &[], &[entry(1, 1, 10)]).unwrap();
        service.block_nids(snapshot).unwrap();

        let mut txn = db.begin();
        assert_eq!(service.purge_room(&mut txn, room).unwrap(), vec![snapshot]);
        // A reader between the purge and its commit still sees the snapshot
        service.block_nids(snapshot).unwrap();
        txn.commit().unwrap();
        service.forget_snapshots(&[snapshot]);

        assert!(matches!(service.block_nids(snapshot), Err(Error::MissingState(_))));
    }

    #[test]
    fn test_missing_snapshot() {
        let service = service(16);
        assert!(matches!(
            service.block_nids(StateSnapshotNid(999)),
            Err(Error::MissingState(_))
        ));
    }
}
