// =============================================================================
// Matrixon Streams - State Compressor Data
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

use matrixon_core::types::{RoomNid, StateBlockNid, StateEntry, StateSnapshotNid};

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

/// Blocks and snapshots are immutable and content-addressed. Inserts
/// commit on their own: an identical insert, from any transaction, returns
/// the NID that is already stored.
pub trait Data: Send + Sync {
    /// `entries` must be sorted by tuple with every tuple at most once.
    fn insert_block(&self, entries: &[StateEntry]) -> Result<StateBlockNid>;

    fn block(&self, block_nid: StateBlockNid) -> Result<Option<Arc<Vec<StateEntry>>>>;

    fn insert_snapshot(
        &self,
        room_nid: RoomNid,
        block_nids: &[StateBlockNid],
    ) -> Result<StateSnapshotNid>;

    fn snapshot_blocks(
        &self,
        snapshot_nid: StateSnapshotNid,
    ) -> Result<Option<Arc<Vec<StateBlockNid>>>>;

    fn room_snapshots(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Vec<StateSnapshotNid>>;

    fn remove_snapshot(
        &self,
        txn: &mut Transaction,
        room_nid: RoomNid,
        snapshot_nid: StateSnapshotNid,
    ) -> Result<()>;

    /// Drops cached blocks of snapshots whose removal has committed.
    fn forget_snapshots(&self, snapshot_nids: &[StateSnapshotNid]);
}
