// =============================================================================
// Matrixon Streams - Short ID Data
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use matrixon_core::types::{EventNid, EventStateKeyNid, EventTypeNid, RoomNid};
use ruma::{EventId, OwnedEventId, OwnedRoomId, RoomId};

use crate::Result;

/// Numeric ID assignment.
///
/// Assignments commit immediately and independently of any transaction:
/// a NID, once handed out, belongs to its string forever.
pub trait Data: Send + Sync {
    fn get_or_create_room_nid(&self, room_id: &RoomId) -> Result<RoomNid>;
    fn room_nid(&self, room_id: &RoomId) -> Result<Option<RoomNid>>;
    fn room_id_from_nid(&self, room_nid: RoomNid) -> Result<Option<OwnedRoomId>>;

    fn get_or_create_event_nid(&self, event_id: &EventId) -> Result<EventNid>;
    fn event_nid(&self, event_id: &EventId) -> Result<Option<EventNid>>;
    fn event_id_from_nid(&self, event_nid: EventNid) -> Result<Option<OwnedEventId>>;

    fn get_or_create_event_type_nid(&self, event_type: &str) -> Result<EventTypeNid>;
    fn event_type_nid(&self, event_type: &str) -> Result<Option<EventTypeNid>>;
    fn event_type_from_nid(&self, nid: EventTypeNid) -> Result<Option<String>>;

    fn get_or_create_state_key_nid(&self, state_key: &str) -> Result<EventStateKeyNid>;
    fn state_key_nid(&self, state_key: &str) -> Result<Option<EventStateKeyNid>>;
    fn state_key_from_nid(&self, nid: EventStateKeyNid) -> Result<Option<String>>;
}
