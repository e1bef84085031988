// =============================================================================
// Matrixon Streams - Sync Response
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::collections::BTreeMap;

use ruma::{OwnedRoomId, OwnedUserId, RoomId};
use serde::Serialize;
use serde_json::Value;

/// The delta handed back to the routing layer, shaped like a `/sync` body.
#[derive(Debug, Default, Serialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(skip_serializing_if = "Rooms::is_empty")]
    pub rooms: Rooms,
    #[serde(skip_serializing_if = "Events::is_empty")]
    pub presence: Events,
    #[serde(skip_serializing_if = "Events::is_empty")]
    pub account_data: Events,
    #[serde(skip_serializing_if = "Events::is_empty")]
    pub to_device: Events,
    #[serde(skip_serializing_if = "DeviceLists::is_empty")]
    pub device_lists: DeviceLists,
}

#[derive(Debug, Default, Serialize)]
pub struct Events {
    pub events: Vec<Value>,
}

#[derive(Debug, Default, Serialize)]
pub struct Rooms {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub join: BTreeMap<OwnedRoomId, JoinedRoom>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub invite: BTreeMap<OwnedRoomId, InvitedRoom>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub leave: BTreeMap<OwnedRoomId, LeftRoom>,
}

#[derive(Debug, Default, Serialize)]
pub struct Timeline {
    pub events: Vec<Value>,
    pub limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct JoinedRoom {
    pub timeline: Timeline,
    pub state: Events,
    pub ephemeral: Events,
    pub account_data: Events,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_notifications: Option<UnreadNotifications>,
    /// Relations added to events of the room since the last sync.
    #[serde(rename = "m.relations", skip_serializing_if = "Events::is_empty")]
    pub relations: Events,
}

#[derive(Debug, Default, Serialize)]
pub struct InvitedRoom {
    pub invite_state: Events,
}

#[derive(Debug, Default, Serialize)]
pub struct LeftRoom {
    pub timeline: Timeline,
    pub state: Events,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnreadNotifications {
    pub notification_count: u64,
    pub highlight_count: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct DeviceLists {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<OwnedUserId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub left: Vec<OwnedUserId>,
}

impl Events {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl JoinedRoom {
    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
            && self.state.is_empty()
            && self.ephemeral.is_empty()
            && self.account_data.is_empty()
            && self.unread_notifications.is_none()
            && self.relations.is_empty()
    }
}

impl Rooms {
    pub fn is_empty(&self) -> bool {
        self.join.values().all(JoinedRoom::is_empty) && self.invite.is_empty() && self.leave.is_empty()
    }
}

impl DeviceLists {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.left.is_empty()
    }
}

impl SyncResponse {
    /// Whether the response carries nothing but the token.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
            && self.presence.is_empty()
            && self.account_data.is_empty()
            && self.to_device.is_empty()
            && self.device_lists.is_empty()
    }

    pub fn joined_room(&mut self, room_id: &RoomId) -> &mut JoinedRoom {
        self.rooms.join.entry(room_id.to_owned()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use ruma::room_id;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_empty_response_serializes_only_token() {
        let response = SyncResponse {
            next_batch: "s1".to_owned(),
            ..Default::default()
        };
        assert!(response.is_empty());
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({ "next_batch": "s1" }));
    }

    #[test]
    fn test_untouched_joined_room_counts_as_empty() {
        let mut response = SyncResponse::default();
        response.joined_room(room_id!("!a:example.org"));
        assert!(response.is_empty());

        response
            .joined_room(room_id!("!a:example.org"))
            .ephemeral
            .events
            .push(json!({ "type": "m.typing" }));
        assert!(!response.is_empty());
    }
}
