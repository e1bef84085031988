// =============================================================================
// Matrixon Streams - Timeline Data
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use matrixon_core::types::{
    EventNid, EventStateKeyNid, EventTypeNid, RoomNid, StateSnapshotNid, StreamPosition,
};
use ruma::{EventId, RoomId};
use serde::{Deserialize, Serialize};

use crate::{
    database::abstraction::{ReadView, Transaction},
    PduEvent, Result,
};

/// An event as persisted, with its NIDs and the state before it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_nid: EventNid,
    pub room_nid: RoomNid,
    pub event_type_nid: EventTypeNid,
    pub state_key_nid: Option<EventStateKeyNid>,
    /// Room state before this event. Zero for the create event.
    pub state_snapshot_nid: StateSnapshotNid,
    pub rejected: bool,
    pub pdu: PduEvent,
}

pub trait Data: Send + Sync {
    /// Writes the event row plus its prev event references.
    fn insert_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()>;

    /// Overwrites the event row only, for redactions.
    fn replace_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()>;

    fn stored_event(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<Option<StoredEvent>>;

    fn room_event_nids(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Vec<EventNid>>;

    /// Whether a stored event lists `event_id` as a prev event.
    fn is_referenced(&self, view: &dyn ReadView, event_id: &EventId) -> Result<bool>;

    fn mark_event_as_sent(&self, txn: &mut Transaction, event_nid: EventNid) -> Result<()>;

    fn has_event_been_sent(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<bool>;

    fn append_pdu_stream(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        room_id: &RoomId,
        event_nid: EventNid,
    ) -> Result<()>;

    fn pdu_stream_position(
        &self,
        view: &dyn ReadView,
        event_nid: EventNid,
    ) -> Result<Option<StreamPosition>>;

    /// Stream rows with `from < position <= to`, ascending.
    fn pdu_stream_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, EventNid)>>;

    /// One room's stream rows with `from < position <= to`.
    fn room_pdu_stream(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
        limit: Option<usize>,
        backwards: bool,
    ) -> Result<Vec<(StreamPosition, EventNid)>>;

    /// Deletes every row belonging to the event.
    fn remove_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()>;
}
