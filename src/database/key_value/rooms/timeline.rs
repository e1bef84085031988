// =============================================================================
// Matrixon Streams - Timeline Storage
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

use matrixon_core::types::{EventNid, RoomNid, StreamPosition};
use ruma::{EventId, RoomId};

use crate::{
    database::{
        abstraction::{prefix_bounds, ReadView, Transaction},
        key, prefix, trees, KeyValueDatabase,
    },
    service::{self, rooms::timeline::StoredEvent},
    utils, Error, Result,
};

fn parse_nid(bytes: &[u8]) -> Result<EventNid> {
    utils::u64_from_bytes(bytes).map(EventNid)
}

fn position_suffix(key: &[u8]) -> Result<StreamPosition> {
    key.len()
        .checked_sub(8)
        .map(|start| &key[start..])
        .ok_or_else(|| Error::bad_database("Invalid key in roompdustream_eventnid."))
        .and_then(utils::u64_from_bytes)
}

impl service::rooms::timeline::Data for KeyValueDatabase {
    fn insert_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()> {
        service::rooms::timeline::Data::replace_event(self, txn, event)?;

        let event_id = event.pdu.event_id.as_bytes();
        for prev in &event.pdu.prev_events {
            txn.insert(trees::PREVEVENTID_EVENTID, &key(&[prev.as_bytes(), event_id]), &[]);
        }

        let mut room_key = event.room_nid.to_be_bytes().to_vec();
        room_key.extend_from_slice(&event.event_nid.to_be_bytes());
        txn.insert(trees::ROOMNID_EVENTNID, &room_key, &[]);
        Ok(())
    }

    fn replace_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()> {
        txn.insert(
            trees::EVENTNID_EVENT,
            &event.event_nid.to_be_bytes(),
            &serde_json::to_vec(event)?,
        );
        Ok(())
    }

    fn stored_event(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<Option<StoredEvent>> {
        view.get(trees::EVENTNID_EVENT, &event_nid.to_be_bytes())?
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|_| Error::bad_database("Invalid event in eventnid_event."))
            })
            .transpose()
    }

    fn room_event_nids(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Vec<EventNid>> {
        view.scan_prefix(trees::ROOMNID_EVENTNID, &room_nid.to_be_bytes(), false)?
            .into_iter()
            .map(|(key, _)| {
                key.get(8..)
                    .ok_or_else(|| Error::bad_database("Invalid key in roomnid_eventnid."))
                    .and_then(parse_nid)
            })
            .collect()
    }

    fn is_referenced(&self, view: &dyn ReadView, event_id: &EventId) -> Result<bool> {
        let (from, to) = prefix_bounds(&prefix(&[event_id.as_bytes()]));
        Ok(!view
            .scan(trees::PREVEVENTID_EVENTID, from, to, false, Some(1))?
            .is_empty())
    }

    fn mark_event_as_sent(&self, txn: &mut Transaction, event_nid: EventNid) -> Result<()> {
        txn.insert(trees::EVENTNID_SENT, &event_nid.to_be_bytes(), &[]);
        Ok(())
    }

    fn has_event_been_sent(&self, view: &dyn ReadView, event_nid: EventNid) -> Result<bool> {
        view.contains(trees::EVENTNID_SENT, &event_nid.to_be_bytes())
    }

    fn append_pdu_stream(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        room_id: &RoomId,
        event_nid: EventNid,
    ) -> Result<()> {
        let nid = event_nid.to_be_bytes();
        txn.insert(trees::PDUSTREAM_EVENTNID, &position.to_be_bytes(), &nid);
        txn.insert(
            trees::ROOMPDUSTREAM_EVENTNID,
            &key(&[room_id.as_bytes(), &position.to_be_bytes()]),
            &nid,
        );
        txn.insert(trees::EVENTNID_PDUSTREAM, &nid, &position.to_be_bytes());
        Ok(())
    }

    fn pdu_stream_position(
        &self,
        view: &dyn ReadView,
        event_nid: EventNid,
    ) -> Result<Option<StreamPosition>> {
        view.get(trees::EVENTNID_PDUSTREAM, &event_nid.to_be_bytes())?
            .map(|bytes| utils::u64_from_bytes(&bytes))
            .transpose()
    }

    fn pdu_stream_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, EventNid)>> {
        view.scan(
            trees::PDUSTREAM_EVENTNID,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )?
        .into_iter()
        .map(|(position, nid)| Ok((utils::u64_from_bytes(&position)?, parse_nid(&nid)?)))
        .collect()
    }

    fn room_pdu_stream(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        from: StreamPosition,
        to: StreamPosition,
        limit: Option<usize>,
        backwards: bool,
    ) -> Result<Vec<(StreamPosition, EventNid)>> {
        view.scan(
            trees::ROOMPDUSTREAM_EVENTNID,
            Bound::Excluded(key(&[room_id.as_bytes(), &from.to_be_bytes()])),
            Bound::Included(key(&[room_id.as_bytes(), &to.to_be_bytes()])),
            backwards,
            limit,
        )?
        .into_iter()
        .map(|(key, nid)| Ok((position_suffix(&key)?, parse_nid(&nid)?)))
        .collect()
    }

    fn remove_event(&self, txn: &mut Transaction, event: &StoredEvent) -> Result<()> {
        let nid = event.event_nid.to_be_bytes();
        let event_id = event.pdu.event_id.as_bytes();

        if let Some(position) = service::rooms::timeline::Data::pdu_stream_position(
            self,
            &*txn,
            event.event_nid,
        )? {
            txn.remove(trees::PDUSTREAM_EVENTNID, &position.to_be_bytes());
            txn.remove(
                trees::ROOMPDUSTREAM_EVENTNID,
                &key(&[event.pdu.room_id.as_bytes(), &position.to_be_bytes()]),
            );
            txn.remove(trees::EVENTNID_PDUSTREAM, &nid);
        }
        for prev in &event.pdu.prev_events {
            txn.remove(trees::PREVEVENTID_EVENTID, &key(&[prev.as_bytes(), event_id]));
        }

        let mut room_key = event.room_nid.to_be_bytes().to_vec();
        room_key.extend_from_slice(&nid);
        txn.remove(trees::ROOMNID_EVENTNID, &room_key);
        txn.remove(trees::EVENTNID_SENT, &nid);
        txn.remove(trees::EVENTNID_EVENT, &nid);
        Ok(())
    }
}
