// =============================================================================
// Matrixon Streams - State Block Storage
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::sync::Arc;

use matrixon_core::types::{
    EventNid, EventStateKeyNid, EventTypeNid, RoomNid, StateBlockNid, StateEntry, StateKeyTuple,
    StateSnapshotNid,
};
use serde::{Deserialize, Serialize};

use crate::{
    database::{
        abstraction::{KeyValueDatabaseEngine, ReadView, Transaction},
        trees, KeyValueDatabase,
    },
    service, utils, Error, Result,
};

const ENTRY_LEN: usize = 24;

#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    room_nid: RoomNid,
    block_nids: Vec<StateBlockNid>,
}

fn encode_block(entries: &[StateEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.len() * ENTRY_LEN);
    for entry in entries {
        bytes.extend_from_slice(&entry.key.event_type_nid.to_be_bytes());
        bytes.extend_from_slice(&entry.key.event_state_key_nid.to_be_bytes());
        bytes.extend_from_slice(&entry.event_nid.to_be_bytes());
    }
    bytes
}

fn decode_block(bytes: &[u8]) -> Result<Vec<StateEntry>> {
    if bytes.len() % ENTRY_LEN != 0 {
        return Err(Error::bad_database("Invalid state block in blocknid_stateblock."));
    }
    bytes
        .chunks_exact(ENTRY_LEN)
        .map(|chunk| {
            Ok(StateEntry::new(
                StateKeyTuple::new(
                    EventTypeNid(utils::u64_from_bytes(&chunk[0..8])?),
                    EventStateKeyNid(utils::u64_from_bytes(&chunk[8..16])?),
                ),
                EventNid(utils::u64_from_bytes(&chunk[16..24])?),
            ))
        })
        .collect()
}

fn snapshot_hash(room_nid: RoomNid, block_nids: &[StateBlockNid]) -> Vec<u8> {
    let room = room_nid.to_be_bytes();
    let blocks: Vec<[u8; 8]> = block_nids.iter().map(|nid| nid.to_be_bytes()).collect();
    let mut parts: Vec<&[u8]> = vec![&room];
    parts.extend(blocks.iter().map(|b| b.as_slice()));
    utils::calculate_hash(&parts)
}

fn room_snapshot_key(room_nid: RoomNid, snapshot_nid: StateSnapshotNid) -> Vec<u8> {
    let mut key = room_nid.to_be_bytes().to_vec();
    key.extend_from_slice(&snapshot_nid.to_be_bytes());
    key
}

impl service::rooms::state_compressor::Data for KeyValueDatabase {
    fn insert_block(&self, entries: &[StateEntry]) -> Result<StateBlockNid> {
        let bytes = encode_block(entries);
        let hash = utils::calculate_hash(&[&bytes]);
        if let Some(existing) = self.engine.get(trees::STATEBLOCKHASH_BLOCKNID, &hash)? {
            return utils::u64_from_bytes(&existing).map(StateBlockNid);
        }

        let nid = self.engine.increment(trees::COUNTERS, b"stateblocknid")?;
        let existing = self.engine.insert_if_absent(
            trees::STATEBLOCKHASH_BLOCKNID,
            &hash,
            &nid.to_be_bytes(),
            vec![(trees::BLOCKNID_STATEBLOCK, nid.to_be_bytes().to_vec(), bytes)],
        )?;
        match existing {
            Some(existing) => utils::u64_from_bytes(&existing).map(StateBlockNid),
            None => {
                let nid = StateBlockNid(nid);
                self.stateblock_cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .put(nid, Arc::new(entries.to_vec()));
                Ok(nid)
            }
        }
    }

    fn block(&self, block_nid: StateBlockNid) -> Result<Option<Arc<Vec<StateEntry>>>> {
        if let Some(entries) = self
            .stateblock_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&block_nid)
        {
            return Ok(Some(Arc::clone(entries)));
        }

        let Some(bytes) = self.engine.get(trees::BLOCKNID_STATEBLOCK, &block_nid.to_be_bytes())? else {
            return Ok(None);
        };
        let entries = Arc::new(decode_block(&bytes)?);
        self.stateblock_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(block_nid, Arc::clone(&entries));
        Ok(Some(entries))
    }

    fn insert_snapshot(
        &self,
        room_nid: RoomNid,
        block_nids: &[StateBlockNid],
    ) -> Result<StateSnapshotNid> {
        let hash = snapshot_hash(room_nid, block_nids);
        if let Some(existing) = self.engine.get(trees::SNAPSHOTHASH_SNAPSHOTNID, &hash)? {
            return utils::u64_from_bytes(&existing).map(StateSnapshotNid);
        }

        let nid = StateSnapshotNid(self.engine.increment(trees::COUNTERS, b"snapshotnid")?);
        let stored = serde_json::to_vec(&StoredSnapshot {
            room_nid,
            block_nids: block_nids.to_vec(),
        })?;
        let existing = self.engine.insert_if_absent(
            trees::SNAPSHOTHASH_SNAPSHOTNID,
            &hash,
            &nid.to_be_bytes(),
            vec![
                (trees::SNAPSHOTNID_SNAPSHOT, nid.to_be_bytes().to_vec(), stored),
                (trees::ROOMNID_SNAPSHOTNID, room_snapshot_key(room_nid, nid), Vec::new()),
            ],
        )?;
        match existing {
            Some(existing) => utils::u64_from_bytes(&existing).map(StateSnapshotNid),
            None => Ok(nid),
        }
    }

    fn snapshot_blocks(
        &self,
        snapshot_nid: StateSnapshotNid,
    ) -> Result<Option<Arc<Vec<StateBlockNid>>>> {
        if let Some(blocks) = self
            .snapshot_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&snapshot_nid)
        {
            return Ok(Some(Arc::clone(blocks)));
        }

        let Some(bytes) = self.engine.get(trees::SNAPSHOTNID_SNAPSHOT, &snapshot_nid.to_be_bytes())? else {
            return Ok(None);
        };
        let stored: StoredSnapshot = serde_json::from_slice(&bytes)
            .map_err(|_| Error::bad_database("Invalid snapshot in snapshotnid_snapshot."))?;
        let blocks = Arc::new(stored.block_nids);
        self.snapshot_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(snapshot_nid, Arc::clone(&blocks));
        Ok(Some(blocks))
    }

    fn room_snapshots(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Vec<StateSnapshotNid>> {
        view.scan_prefix(trees::ROOMNID_SNAPSHOTNID, &room_nid.to_be_bytes(), false)?
            .into_iter()
            .map(|(key, _)| {
                key.get(8..)
                    .ok_or_else(|| Error::bad_database("Invalid key in roomnid_snapshotnid."))
                    .and_then(utils::u64_from_bytes)
                    .map(StateSnapshotNid)
            })
            .collect()
    }

    fn remove_snapshot(
        &self,
        txn: &mut Transaction,
        room_nid: RoomNid,
        snapshot_nid: StateSnapshotNid,
    ) -> Result<()> {
        if let Some(blocks) =
            service::rooms::state_compressor::Data::snapshot_blocks(self, snapshot_nid)?
        {
            txn.remove(trees::SNAPSHOTHASH_SNAPSHOTNID, &snapshot_hash(room_nid, &blocks));
        }
        txn.remove(trees::SNAPSHOTNID_SNAPSHOT, &snapshot_nid.to_be_bytes());
        txn.remove(trees::ROOMNID_SNAPSHOTNID, &room_snapshot_key(room_nid, snapshot_nid));
        Ok(())
    }

    fn forget_snapshots(&self, snapshot_nids: &[StateSnapshotNid]) {
        let mut cache = self.snapshot_cache.lock().unwrap_or_else(|e| e.into_inner());
        for snapshot_nid in snapshot_nids {
            cache.pop(snapshot_nid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_encoding() {
        let entries = vec![StateEntry::new(
            StateKeyTuple::new(EventTypeNid(1), EventStateKeyNid(2)),
            EventNid(3),
        )];
        let bytes = encode_block(&entries);
        assert_eq!(bytes.len(), ENTRY_LEN);
        assert_eq!(decode_block(&bytes).unwrap(), entries);
        assert!(decode_block(&bytes[1..]).is_err());
    }
}
