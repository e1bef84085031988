// =============================================================================
// Matrixon Streams - Topology Data
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
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub trait Data: Send + Sync {
    /// Adds the event at `token` unless it already has a topology row.
    /// Returns whether a row was written.
    fn insert_topology(
        &self,
        txn: &mut Transaction,
        room_id: &RoomId,
        event_id: &EventId,
        token: TopologyToken,
    ) -> Result<bool>;

    fn event_topology(&self, view: &dyn ReadView, event_id: &EventId) -> Result<Option<TopologyToken>>;

    /// Rows of one room between two tokens, ordered by (depth, position).
    fn topology_range(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        from: Bound<TopologyToken>,
        to: Bound<TopologyToken>,
        backwards: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(TopologyToken, OwnedEventId)>>;

    fn remove_room_topology(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize>;
}
