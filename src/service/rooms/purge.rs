// =============================================================================
// Matrixon Streams - Room Purge
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

use ruma::RoomId;
use tracing::info;

use crate::{service::Services, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    pub events: usize,
    pub topology_rows: usize,
    pub snapshots: usize,
}

pub struct Service;

impl Service {
    /// Deletes everything stored for a room under the room lock.
    ///
    /// State blocks may be shared with other rooms and stay. NIDs and stream
    /// counters are never reused, so they stay too.
    #[tracing::instrument(skip(self, services))]
    pub async fn purge_room(&self, services: &Services, room_id: &RoomId) -> Result<PurgeStats> {
        let rooms = &services.rooms;
        let room_nid = rooms
            .short
            .room_nid(room_id)?
            .ok_or_else(|| super::Service::room_not_found(room_id))?;

        let mut txn = services.begin();
        rooms.metadata.db.lock_room(&mut txn, room_id).await?;

        let mut stats = PurgeStats::default();
        for event_nid in rooms.timeline.room_event_nids(&txn, room_nid)? {
            if let Some(event) = rooms.timeline.get(&txn, event_nid)? {
                rooms.timeline.remove_event(&mut txn, &event)?;
                stats.events += 1;
            }
        }

        stats.topology_rows = rooms.topology.purge_room(&mut txn, room_id)?;
        let snapshots = rooms.state_compressor.purge_room(&mut txn, room_nid)?;
        stats.snapshots = snapshots.len();
        rooms.state_cache.purge_room(&mut txn, room_id)?;
        rooms.pdu_metadata.purge_room(&mut txn, room_id)?;
        rooms.edus.read_receipt.purge_room(&mut txn, room_id)?;
        rooms.user.purge_room(&mut txn, room_id)?;
        rooms.metadata.db.remove_room_info(&mut txn, room_nid)?;
        txn.commit()?;
        rooms.state_compressor.forget_snapshots(&snapshots);

        info!(
            "🗑️ Purged room {}: {} events, {} topology rows, {} snapshots",
            room_id, stats.events, stats.topology_rows, stats.snapshots
        );
        Ok(stats)
    }
}
