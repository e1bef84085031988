// =============================================================================
// Matrixon Streams - Room Metadata Service
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
//   Read side of the room row. Writes go through the room updater only.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{Data, RoomInfo};
use matrixon_core::types::{RoomNid, StateSnapshotNid};

use crate::{database::abstraction::ReadView, Result};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn room_info(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Option<RoomInfo>> {
        self.db.room_info(view, room_nid)
    }

    pub fn exists(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<bool> {
        Ok(self.room_info(view, room_nid)?.is_some())
    }

    /// The room's current state snapshot. A room without a row has empty
    /// state, which is snapshot 0.
    pub fn current_state_snapshot(
        &self,
        view: &dyn ReadView,
        room_nid: RoomNid,
    ) -> Result<StateSnapshotNid> {
        Ok(self
            .room_info(view, room_nid)?
            .map(|info| info.state_snapshot_nid)
            .unwrap_or_default())
    }
}
