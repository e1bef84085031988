// =============================================================================
// Matrixon Streams - Short ID Storage
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::{hash::Hash, sync::Mutex};

use lru::LruCache;
use matrixon_core::types::{EventNid, EventStateKeyNid, EventTypeNid, RoomNid};
use ruma::{EventId, OwnedEventId, OwnedRoomId, RoomId};

use crate::{
    database::{abstraction::KeyValueDatabaseEngine, trees, KeyValueDatabase},
    service, utils, Error, Result,
};

fn cached<K: Hash + Eq, V: Copy>(cache: &Mutex<LruCache<K, V>>, key: &K) -> Option<V> {
    cache.lock().unwrap_or_else(|e| e.into_inner()).get(key).copied()
}

fn remember<K: Hash + Eq, V>(cache: &Mutex<LruCache<K, V>>, key: K, value: V) {
    cache.lock().unwrap_or_else(|e| e.into_inner()).put(key, value);
}

impl KeyValueDatabase {
    fn lookup_nid(&self, forward: &'static str, name: &[u8]) -> Result<Option<u64>> {
        self.engine
            .get(forward, name)?
            .map(|bytes| utils::u64_from_bytes(&bytes))
            .transpose()
    }

    /// Assigns the next NID of `counter` to `name` unless it already has one.
    /// Racing callers agree on whichever assignment committed first.
    fn get_or_create_nid(
        &self,
        forward: &'static str,
        backward: &'static str,
        counter: &[u8],
        name: &[u8],
    ) -> Result<u64> {
        if let Some(nid) = self.lookup_nid(forward, name)? {
            return Ok(nid);
        }

        let nid = self.engine.increment(trees::COUNTERS, counter)?;
        let existing = self.engine.insert_if_absent(
            forward,
            name,
            &nid.to_be_bytes(),
            vec![(backward, nid.to_be_bytes().to_vec(), name.to_vec())],
        )?;
        match existing {
            Some(bytes) => utils::u64_from_bytes(&bytes),
            None => Ok(nid),
        }
    }

    fn nid_to_string(&self, backward: &'static str, nid: u64) -> Result<Option<String>> {
        self.engine
            .get(backward, &nid.to_be_bytes())?
            .map(|bytes| utils::string_from_bytes(&bytes))
            .transpose()
    }
}

impl service::rooms::short::Data for KeyValueDatabase {
    fn get_or_create_room_nid(&self, room_id: &RoomId) -> Result<RoomNid> {
        if let Some(nid) = cached(&self.roomid_roomnid_cache, &room_id.to_owned()) {
            return Ok(nid);
        }
        let nid = RoomNid(self.get_or_create_nid(
            trees::ROOMID_ROOMNID,
            trees::ROOMNID_ROOMID,
            b"roomnid",
            room_id.as_bytes(),
        )?);
        remember(&self.roomid_roomnid_cache, room_id.to_owned(), nid);
        Ok(nid)
    }

    fn room_nid(&self, room_id: &RoomId) -> Result<Option<RoomNid>> {
        if let Some(nid) = cached(&self.roomid_roomnid_cache, &room_id.to_owned()) {
            return Ok(Some(nid));
        }
        let nid = self.lookup_nid(trees::ROOMID_ROOMNID, room_id.as_bytes())?.map(RoomNid);
        if let Some(nid) = nid {
            remember(&self.roomid_roomnid_cache, room_id.to_owned(), nid);
        }
        Ok(nid)
    }

    fn room_id_from_nid(&self, room_nid: RoomNid) -> Result<Option<OwnedRoomId>> {
        self.nid_to_string(trees::ROOMNID_ROOMID, room_nid.get())?
            .map(|s| {
                RoomId::parse(s).map_err(|_| Error::bad_database("Room ID in roomnid_roomid is invalid."))
            })
            .transpose()
    }

    fn get_or_create_event_nid(&self, event_id: &EventId) -> Result<EventNid> {
        if let Some(nid) = cached(&self.eventid_eventnid_cache, &event_id.to_owned()) {
            return Ok(nid);
        }
        let nid = EventNid(self.get_or_create_nid(
            trees::EVENTID_EVENTNID,
            trees::EVENTNID_EVENTID,
            b"eventnid",
            event_id.as_bytes(),
        )?);
        remember(&self.eventid_eventnid_cache, event_id.to_owned(), nid);
        Ok(nid)
    }

    fn event_nid(&self, event_id: &EventId) -> Result<Option<EventNid>> {
        if let Some(nid) = cached(&self.eventid_eventnid_cache, &event_id.to_owned()) {
            return Ok(Some(nid));
        }
        let nid = self.lookup_nid(trees::EVENTID_EVENTNID, event_id.as_bytes())?.map(EventNid);
        if let Some(nid) = nid {
            remember(&self.eventid_eventnid_cache, event_id.to_owned(), nid);
        }
        Ok(nid)
    }

    fn event_id_from_nid(&self, event_nid: EventNid) -> Result<Option<OwnedEventId>> {
        if let Some(id) = self
            .eventnid_eventid_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_nid)
        {
            return Ok(Some(id.clone()));
        }
        let id = self
            .nid_to_string(trees::EVENTNID_EVENTID, event_nid.get())?
            .map(|s| {
                EventId::parse(s).map_err(|_| Error::bad_database("Event ID in eventnid_eventid is invalid."))
            })
            .transpose()?;
        if let Some(id) = &id {
            remember(&self.eventnid_eventid_cache, event_nid, id.clone());
        }
        Ok(id)
    }

    fn get_or_create_event_type_nid(&self, event_type: &str) -> Result<EventTypeNid> {
        if let Some(nid) = cached(&self.eventtype_typenid_cache, &event_type.to_owned()) {
            return Ok(nid);
        }
        let nid = EventTypeNid(self.get_or_create_nid(
            trees::EVENTTYPE_TYPENID,
            trees::TYPENID_EVENTTYPE,
            b"typenid",
            event_type.as_bytes(),
        )?);
        remember(&self.eventtype_typenid_cache, event_type.to_owned(), nid);
        Ok(nid)
    }

    fn event_type_nid(&self, event_type: &str) -> Result<Option<EventTypeNid>> {
        if let Some(nid) = cached(&self.eventtype_typenid_cache, &event_type.to_owned()) {
            return Ok(Some(nid));
        }
        Ok(self
            .lookup_nid(trees::EVENTTYPE_TYPENID, event_type.as_bytes())?
            .map(EventTypeNid))
    }

    fn event_type_from_nid(&self, nid: EventTypeNid) -> Result<Option<String>> {
        self.nid_to_string(trees::TYPENID_EVENTTYPE, nid.get())
    }

    fn get_or_create_state_key_nid(&self, state_key: &str) -> Result<EventStateKeyNid> {
        if let Some(nid) = cached(&self.statekey_statekeynid_cache, &state_key.to_owned()) {
            return Ok(nid);
        }
        let nid = EventStateKeyNid(self.get_or_create_nid(
            trees::STATEKEY_STATEKEYNID,
            trees::STATEKEYNID_STATEKEY,
            b"statekeynid",
            state_key.as_bytes(),
        )?);
        remember(&self.statekey_statekeynid_cache, state_key.to_owned(), nid);
        Ok(nid)
    }

    fn state_key_nid(&self, state_key: &str) -> Result<Option<EventStateKeyNid>> {
        if let Some(nid) = cached(&self.statekey_statekeynid_cache, &state_key.to_owned()) {
            return Ok(Some(nid));
        }
        Ok(self
            .lookup_nid(trees::STATEKEY_STATEKEYNID, state_key.as_bytes())?
            .map(EventStateKeyNid))
    }

    fn state_key_from_nid(&self, nid: EventStateKeyNid) -> Result<Option<String>> {
        self.nid_to_string(trees::STATEKEYNID_STATEKEY, nid.get())
    }
}
