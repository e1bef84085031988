// =============================================================================
// Matrixon Streams - Event Builder
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
//   Fills in the graph fields of a locally sent event: prev events from the
//   room frontier, auth events from the current state and the depth.
//
// =============================================================================

use matrixon_core::types::{StateKeyTuple, StateSnapshotNid};
use ruma::{OwnedEventId, RoomId, UserId};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    service::{pdu::PduEvent, Services},
    utils, Result,
};

pub struct Service {
    /// Other implementations refuse events referencing more than this.
    pub max_prev_events: usize,
    pub max_auth_events: usize,
}

impl Service {
    /// Builds an event on top of the room's current frontier.
    ///
    /// The create event of a new room has no prev events and depth 0; any
    /// other event in an unknown room is `NotFound`.
    pub fn build_event(
        &self,
        services: &Services,
        room_id: &RoomId,
        sender: &UserId,
        event_type: &str,
        state_key: Option<&str>,
        content: Value,
    ) -> Result<PduEvent> {
        let rooms = &services.rooms;
        let snapshot = services.snapshot();

        let info = match rooms.short.room_nid(room_id)? {
            Some(room_nid) => rooms.metadata.room_info(&snapshot, room_nid)?,
            None => None,
        };

        let (prev_events, auth_events, depth) = match info {
            Some(info) => {
                let mut prev = info
                    .latest_event_nids
                    .iter()
                    .map(|nid| {
                        let event = rooms.timeline.get_required(&snapshot, *nid)?;
                        Ok((event.pdu.depth, event.pdu.event_id))
                    })
                    .collect::<Result<Vec<_>>>()?;
                // Deepest first, so truncation keeps the most recent heads
                prev.sort_unstable_by(|a, b| b.cmp(a));
                if prev.len() > self.max_prev_events {
                    debug!(
                        "Truncating {} prev events of {} to {}",
                        prev.len(),
                        room_id,
                        self.max_prev_events
                    );
                    prev.truncate(self.max_prev_events);
                }

                let depth = prev
                    .iter()
                    .map(|(depth, _)| depth.saturating_add(1))
                    .max()
                    .unwrap_or_default();
                let auth_events =
                    self.auth_events(services, info.state_snapshot_nid, sender, event_type, state_key)?;
                let prev_events: Vec<OwnedEventId> = prev.into_iter().map(|(_, id)| id).collect();
                (prev_events, auth_events, depth)
            }
            None if event_type == "m.room.create" => (Vec::new(), Vec::new(), 0),
            None => return Err(super::Service::room_not_found(room_id)),
        };

        let mut value = json!({
            "room_id": room_id,
            "sender": sender,
            "origin_server_ts": utils::millis_since_unix_epoch(),
            "type": event_type,
            "content": content,
            "depth": depth,
            "prev_events": prev_events,
            "auth_events": auth_events,
        });
        if let Some(state_key) = state_key {
            value["state_key"] = json!(state_key);
        }
        if event_type == "m.room.redaction" {
            if let Some(redacts) = value["content"].get("redacts").cloned() {
                value["redacts"] = redacts;
            }
        }

        PduEvent::from_json(value)
    }

    /// Selects the auth events for a new event from the current state.
    fn auth_events(
        &self,
        services: &Services,
        snapshot_nid: StateSnapshotNid,
        sender: &UserId,
        event_type: &str,
        state_key: Option<&str>,
    ) -> Result<Vec<OwnedEventId>> {
        let rooms = &services.rooms;

        let mut wanted = vec![
            ("m.room.create", ""),
            ("m.room.power_levels", ""),
            ("m.room.member", sender.as_str()),
        ];
        if event_type == "m.room.member" {
            wanted.push(("m.room.join_rules", ""));
            if let Some(target) = state_key.filter(|target| *target != sender.as_str()) {
                wanted.push(("m.room.member", target));
            }
        }

        let mut tuples: Vec<StateKeyTuple> = Vec::with_capacity(wanted.len());
        for (kind, key) in wanted {
            tuples.extend(rooms.short.state_key_tuple(kind, key)?);
        }

        let block_nids = rooms.state_compressor.block_nids(snapshot_nid)?;
        let mut auth_events = rooms
            .state_compressor
            .state_entries_for_tuples(&block_nids, &tuples)?
            .into_iter()
            .map(|entry| rooms.short.event_id_from_nid(entry.event_nid))
            .collect::<Result<Vec<_>>>()?;
        auth_events.truncate(self.max_auth_events);
        Ok(auth_events)
    }
}
