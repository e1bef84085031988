// =============================================================================
// Matrixon Streams - Timeline Service
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
//   Event storage and the PDU stream. Events are stored once per NID; the
//   PDU stream records the arrival position of every event that was sent
//   to the output.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::{Data, StoredEvent};
use matrixon_core::types::{EventNid, RoomNid, StreamPosition};
use ruma::{EventId, RoomId};
use tracing::debug;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Error, Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    /// Stores an event. Returns `false` without writing anything if the NID
    /// is already stored, which makes redelivered events harmless.
    pub fn insert_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<bool> {
        if self.db.stored_event(&*txn, event.event_nid)?.is_some() {
            debug!("Event {} is already stored", event.pdu.event_id);
            return Ok(false);
        }
        self.db.insert_event(txn, event)?;
        Ok(true)
    }

    pub fn replace_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()> {
        self.db.replace_event(txn, event)
    }

    pub fn get(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<Option<StoredEvent>> {
        self.db.stored_event(view, event_nid)
    }

    /// Like [`Service::get`], for events that other rows reference.
    pub fn get_required(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<StoredEvent> {
        self.get(view, event_nid)?
            .ok_or_else(|| Error::bad_database("Referenced event NID is not stored."))
    }

    pub fn room_event_nids(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Vec<EventNid>> {
        self.db.room_event_nids(view, room_nid)
    }

    pub fn is_referenced(&self, view: &dyn ReadView, event_id: &EventId) -> Result<bool> {
        self.db.is_referenced(view, event_id)
    }

    pub fn mark_event_as_sent(&self, txn: &mut Transaction, event_nid: EventNid) -> Result<()> {
        self.db.mark_event_as_sent(txn, event_nid)
    }

    pub fn has_event_been_sent(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<bool> {
        self.db.has_event_been_sent(view, event_nid)
    }

    pub fn append_pdu(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        room_id: &RoomId,
        event_nid: EventNid,
    ) -> Result<()> {
        self.db.append_pdu_stream(txn, position, room_id, event_nid)
    }

    pub fn pdu_position(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<Option<StreamPosition>> {
        self.db.pdu_stream_position(view, event_nid)
    }

    /// Events sent in `(from, to]`, in stream order.
    pub fn pdus_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, StoredEvent)>> {
        self.db
            .pdu_stream_range(view, from, to)?
            .into_iter()
            .map(|(position, nid)| Ok((position, self.get_required(view, nid)?)))
            .collect()
    }

    /// The newest `limit` events of a room in `(from, to]`, returned in
    /// stream order, and whether older ones in the range were left out.
    pub fn recent_room_pdus(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
        limit: usize,
    ) -> Result<(Vec<(StreamPosition, StoredEvent)>, bool)> {
        let mut rows = self
            .db
            .room_pdu_stream(view, room_id, from, to, Some(limit + 1), true)?;
        let limited = rows.len() > limit;
        rows.truncate(limit);
        rows.reverse();

        let events = rows
            .into_iter()
            .map(|(position, nid)| Ok((position, self.get_required(view, nid)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok((events, limited))
    }

    pub fn remove_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()> {
        self.db.remove_event(txn, event)
    }
}
