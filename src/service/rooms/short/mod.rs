// =============================================================================
// Matrixon Streams - Short ID Service
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
//   Maps room IDs, event IDs, event types and state keys to numeric IDs so
//   that state blocks and room metadata can be compared as integers.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::Data;
use matrixon_core::types::{EventNid, EventTypeNid, RoomNid, StateKeyTuple};
use ruma::{EventId, OwnedEventId, OwnedRoomId, RoomId};

use crate::{Error, Result};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn get_or_create_room_nid(&self, room_id: &RoomId) -> Result<RoomNid> {
        self.db.get_or_create_room_nid(room_id)
    }

    pub fn room_nid(&self, room_id: &RoomId) -> Result<Option<RoomNid>> {
        self.db.room_nid(room_id)
    }

    pub fn room_id_from_nid(&self, room_nid: RoomNid) -> Result<OwnedRoomId> {
        self.db
            .room_id_from_nid(room_nid)?
            .ok_or_else(|| Error::bad_database("Room NID has no room ID."))
    }

    pub fn get_or_create_event_nid(&self, event_id: &EventId) -> Result<EventNid> {
        self.db.get_or_create_event_nid(event_id)
    }

    pub fn event_nid(&self, event_id: &EventId) -> Result<Option<EventNid>> {
        self.db.event_nid(event_id)
    }

    pub fn event_id_from_nid(&self, event_nid: EventNid) -> Result<OwnedEventId> {
        self.db
            .event_id_from_nid(event_nid)?
            .ok_or_else(|| Error::bad_database("Event NID has no event ID."))
    }

    pub fn get_or_create_event_type_nid(&self, event_type: &str) -> Result<EventTypeNid> {
        self.db.get_or_create_event_type_nid(event_type)
    }

    pub fn get_or_create_state_key_tuple(&self, event_type: &str, state_key: &str) -> Result<StateKeyTuple> {
        Ok(StateKeyTuple::new(
            self.db.get_or_create_event_type_nid(event_type)?,
            self.db.get_or_create_state_key_nid(state_key)?,
        ))
    }

    /// Looks up a tuple without assigning NIDs. `None` means no event ever
    /// used this (type, state key) pair, so no state can contain it.
    pub fn state_key_tuple(&self, event_type: &str, state_key: &str) -> Result<Option<StateKeyTuple>> {
        let Some(type_nid) = self.db.event_type_nid(event_type)? else {
            return Ok(None);
        };
        let Some(state_key_nid) = self.db.state_key_nid(state_key)? else {
            return Ok(None);
        };
        Ok(Some(StateKeyTuple::new(type_nid, state_key_nid)))
    }

    /// The (type, state key) strings of a tuple.
    pub fn tuple_strings(&self, tuple: StateKeyTuple) -> Result<(String, String)> {
        let event_type = self
            .db
            .event_type_from_nid(tuple.event_type_nid)?
            .ok_or_else(|| Error::bad_database("Event type NID has no string."))?;
        let state_key = self
            .db
            .state_key_from_nid(tuple.event_state_key_nid)?
            .ok_or_else(|| Error::bad_database("State key NID has no string."))?;
        Ok((event_type, state_key))
    }
}
