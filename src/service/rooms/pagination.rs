// =============================================================================
// Matrixon Streams - Pagination
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
//   Point lookups and history pagination for the routing layer. Tokens may
//   be topological or streaming; streaming ones are converted to a depth
//   through the topology index before paginating causally.
//
// =============================================================================

use matrixon_core::types::{
    Direction, PaginationToken, StreamKind, StreamPosition, TopologyToken,
};
use ruma::{EventId, OwnedEventId, RoomId};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    database::abstraction::ReadView,
    service::{pdu::PduEvent, Services},
    Error, Result,
};

#[derive(Debug, Default, Serialize)]
pub struct Messages {
    pub chunk: Vec<Value>,
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventContext {
    pub event: Value,
    pub events_before: Vec<Value>,
    pub events_after: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub state: Vec<Value>,
}

#[derive(Debug, Default, Serialize)]
pub struct Relations {
    pub chunk: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_batch: Option<String>,
}

pub struct Service;

impl Service {
    /// An accepted event by ID. Rejected events are never served.
    pub fn get_event(&self, services: &Services, event_id: &EventId) -> Result<Option<PduEvent>> {
        let snapshot = services.snapshot();
        self.load(services, &snapshot, event_id)
    }

    fn load(&self, services: &Services, view: &dyn ReadView, event_id: &EventId) -> Result<Option<PduEvent>> {
        let rooms = &services.rooms;
        let Some(event_nid) = rooms.short.event_nid(event_id)? else {
            return Ok(None);
        };
        Ok(rooms
            .timeline
            .get(view, event_nid)?
            .filter(|event| !event.rejected)
            .map(|event| event.pdu))
    }

    /// Room history from `from` in `direction`.
    ///
    /// Without a token, backward pagination starts at the newest event and
    /// forward pagination at the oldest.
    pub fn messages(
        &self,
        services: &Services,
        room_id: &RoomId,
        from: Option<PaginationToken>,
        direction: Direction,
        limit: usize,
    ) -> Result<Messages> {
        let snapshot = services.snapshot();
        let topology = &services.rooms.topology;

        let from = match from {
            Some(PaginationToken::Topology(token)) => Some(token),
            Some(PaginationToken::Stream(token)) => {
                self.stream_to_topology(services, &snapshot, room_id, token.get(StreamKind::Pdu), direction)?
            }
            None => Some(match direction {
                Direction::Backward => TopologyToken::new(u64::MAX, StreamPosition::MAX),
                Direction::Forward => TopologyToken::default(),
            }),
        };
        let Some(from) = from else {
            return Ok(Messages::default());
        };

        let rows = topology.paginate(&snapshot, room_id, from, direction, limit)?;
        let end = (rows.len() == limit)
            .then(|| rows.last().map(|(token, _)| token.to_string()))
            .flatten();

        let mut chunk = Vec::with_capacity(rows.len());
        for (_, event_id) in &rows {
            if let Some(pdu) = self.load(services, &snapshot, event_id)? {
                chunk.push(pdu.to_room_value());
            }
        }
        debug!("Paginated {} events of {} from {}", chunk.len(), room_id, from);

        Ok(Messages {
            chunk,
            start: from.to_string(),
            end,
        })
    }

    /// A streaming cursor as a topological one. `None` when no event of the
    /// room lies on that side of the cursor.
    fn stream_to_topology(
        &self,
        services: &Services,
        view: &dyn ReadView,
        room_id: &RoomId,
        position: StreamPosition,
        direction: Direction,
    ) -> Result<Option<TopologyToken>> {
        let backward = direction == Direction::Backward;
        let depth = services
            .rooms
            .topology
            .stream_to_topological_position(view, room_id, position, backward)?;
        // Pagination is exclusive: backwards the event at `position` itself
        // is included, forwards it is skipped.
        Ok(depth.map(|depth| {
            if backward {
                TopologyToken::new(depth, position.saturating_add(1))
            } else {
                TopologyToken::new(depth, position)
            }
        }))
    }

    /// The event with up to `limit` events around it and the state before it.
    pub fn context(&self, services: &Services, event_id: &EventId, limit: usize) -> Result<EventContext> {
        let snapshot = services.snapshot();
        let rooms = &services.rooms;

        let not_found = || Error::NotFound(format!("event {event_id}"));
        let event_nid = rooms.short.event_nid(event_id)?.ok_or_else(not_found)?;
        let stored = rooms
            .timeline
            .get(&snapshot, event_nid)?
            .filter(|event| !event.rejected)
            .ok_or_else(not_found)?;
        let token = rooms
            .topology
            .event_topology(&snapshot, event_id)?
            .ok_or_else(not_found)?;

        let before_limit = limit / 2;
        let before = rooms
            .topology
            .paginate(&snapshot, &stored.pdu.room_id, token, Direction::Backward, before_limit)?;
        let after = rooms.topology.paginate(
            &snapshot,
            &stored.pdu.room_id,
            token,
            Direction::Forward,
            limit - before_limit,
        )?;

        let events = |rows: &[(TopologyToken, OwnedEventId)]| -> Result<Vec<Value>> {
            let mut events = Vec::with_capacity(rows.len());
            for (_, event_id) in rows {
                events.extend(self.load(services, &snapshot, event_id)?.map(|pdu| pdu.to_room_value()));
            }
            Ok(events)
        };

        let state = rooms
            .state_events(&snapshot, stored.state_snapshot_nid)?
            .iter()
            .map(PduEvent::to_room_value)
            .collect();

        Ok(EventContext {
            event: stored.pdu.to_room_value(),
            events_before: events(&before)?,
            events_after: events(&after)?,
            start: before.last().map(|(token, _)| token.to_string()),
            end: after.last().map(|(token, _)| token.to_string()),
            state,
        })
    }

    /// Children of `parent`, newest first. `from` is a `next_batch` of an
    /// earlier page.
    pub fn relations(
        &self,
        services: &Services,
        parent: &EventId,
        rel_type: Option<&str>,
        from: Option<&str>,
        limit: usize,
    ) -> Result<Relations> {
        let snapshot = services.snapshot();
        let before = from
            .map(|from| {
                from.parse::<StreamPosition>()
                    .map_err(|_| Error::BadRequest(format!("invalid relations token {from:?}")))
            })
            .transpose()?;

        let mut records = services.rooms.pdu_metadata.relations(
            &snapshot,
            parent,
            rel_type,
            before,
            limit.saturating_add(1),
        )?;
        let next_batch = if records.len() > limit {
            records.truncate(limit);
            records.last().map(|(position, _)| position.to_string())
        } else {
            None
        };

        let mut chunk = Vec::with_capacity(records.len());
        for (_, record) in &records {
            chunk.extend(self.load(services, &snapshot, &record.event_id)?.map(|pdu| pdu.to_room_value()));
        }
        Ok(Relations { chunk, next_batch })
    }
}
