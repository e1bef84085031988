// =============================================================================
// Matrixon Streams - Rooms Module
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
//   Room server core: event storage, content-addressed state, topology and
//   the per-room updater that moves a room forward when an event is accepted.
//
// =============================================================================

pub mod builder;
pub mod edus;
pub mod event_handler;
pub mod metadata;
pub mod pagination;
pub mod pdu_metadata;
pub mod purge;
pub mod short;
pub mod state_cache;
pub mod state_compressor;
pub mod state_res;
pub mod timeline;
pub mod topology;
pub mod updater;
pub mod user;

use matrixon_core::types::{StateEntry, StateKeyTuple, StateSnapshotNid};
use ruma::RoomId;

use crate::{
    database::abstraction::ReadView,
    service::{pdu::PduEvent, rooms::timeline::StoredEvent},
    Error, Result,
};

pub trait Data:
    edus::Data
    + metadata::Data
    + pdu_metadata::Data
    + short::Data
    + state_cache::Data
    + state_compressor::Data
    + timeline::Data
    + topology::Data
    + user::Data
{
}

impl<T> Data for T where
    T: edus::Data
        + metadata::Data
        + pdu_metadata::Data
        + short::Data
        + state_cache::Data
        + state_compressor::Data
        + timeline::Data
        + topology::Data
        + user::Data
{
}

pub struct Service {
    pub builder: builder::Service,
    pub edus: edus::Service,
    pub event_handler: event_handler::Service,
    pub metadata: metadata::Service,
    pub pagination: pagination::Service,
    pub pdu_metadata: pdu_metadata::Service,
    pub purge: purge::Service,
    pub short: short::Service,
    pub state_cache: state_cache::Service,
    pub state_compressor: state_compressor::Service,
    pub timeline: timeline::Service,
    pub topology: topology::Service,
    pub user: user::Service,
}

impl Service {
    /// The current state snapshot of a room, 0 for an unknown room.
    pub fn current_state_snapshot(&self, view: &dyn ReadView, room_id: &RoomId) -> Result<StateSnapshotNid> {
        match self.short.room_nid(room_id)? {
            Some(room_nid) => self.metadata.current_state_snapshot(view, room_nid),
            None => Ok(StateSnapshotNid::default()),
        }
    }

    /// The state right after `event`: the state before it plus the event
    /// itself if it is an accepted state event.
    pub fn state_after(&self, event: &StoredEvent) -> Result<StateSnapshotNid> {
        let Some(entry) = Self::state_entry(event) else {
            return Ok(event.state_snapshot_nid);
        };
        let base = self.state_compressor.block_nids(event.state_snapshot_nid)?;
        self.state_compressor.add_state(event.room_nid, &base, &[entry])
    }

    /// The state entry an event contributes, if any.
    pub fn state_entry(event: &StoredEvent) -> Option<StateEntry> {
        if event.rejected {
            return None;
        }
        event.state_key_nid.map(|state_key_nid| {
            StateEntry::new(
                StateKeyTuple::new(event.event_type_nid, state_key_nid),
                event.event_nid,
            )
        })
    }

    /// Resolves a snapshot to the events it holds, in tuple order.
    pub fn state_events(&self, view: &dyn ReadView, snapshot_nid: StateSnapshotNid) -> Result<Vec<PduEvent>> {
        self.state_compressor
            .snapshot_entries(snapshot_nid)?
            .into_iter()
            .map(|entry| Ok(self.timeline.get_required(view, entry.event_nid)?.pdu))
            .collect()
    }

    /// One state event of a snapshot, looked up without resolving the rest.
    pub fn state_event(
        &self,
        view: &dyn ReadView,
        snapshot_nid: StateSnapshotNid,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<PduEvent>> {
        let Some(tuple) = self.short.state_key_tuple(event_type, state_key)? else {
            return Ok(None);
        };
        let block_nids = self.state_compressor.block_nids(snapshot_nid)?;
        match self
            .state_compressor
            .state_entries_for_tuples(&block_nids, &[tuple])?
            .first()
        {
            Some(entry) => Ok(Some(self.timeline.get_required(view, entry.event_nid)?.pdu)),
            None => Ok(None),
        }
    }

    pub(crate) fn room_not_found(room_id: &RoomId) -> Error {
        Error::NotFound(format!("room {room_id} does not exist"))
    }
}
