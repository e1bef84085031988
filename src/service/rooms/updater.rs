// =============================================================================
// Matrixon Streams - Room Updater
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
//   Serialized unit of work for one room. Beginning an updater locks the
//   room until the transaction commits or rolls back, and loads the room row
//   as it is under that lock. This is the only code that moves a room's
//   frontier or state pointer.
//
// =============================================================================

use matrixon_core::types::{EventNid, RoomNid, StateSnapshotNid};
use ruma::{EventId, OwnedRoomId, RoomId};
use tracing::debug;

use super::metadata::RoomInfo;
use crate::{
    database::abstraction::{ReadView, Snapshot, Transaction},
    Error, Result,
};

enum Context {
    Write(Transaction),
    /// No writable transaction; commit and rollback do nothing.
    ReadOnly(Snapshot),
}

pub struct RoomUpdater<'a> {
    rooms: &'a super::Service,
    context: Context,
    room_id: OwnedRoomId,
    room_nid: RoomNid,
    info: Option<RoomInfo>,
    room_version: String,
}

impl<'a> RoomUpdater<'a> {
    /// Locks the room inside `txn` and loads its row. A room without a row
    /// gets an empty frontier so that its create event can be accepted.
    pub async fn begin(
        rooms: &'a super::Service,
        mut txn: Transaction,
        room_id: &RoomId,
        room_nid: RoomNid,
    ) -> Result<RoomUpdater<'a>> {
        rooms.metadata.db.lock_room(&mut txn, room_id).await?;
        let info = rooms.metadata.room_info(&txn, room_nid)?;
        debug!(
            "Room updater for {} ({} latest events)",
            room_id,
            info.as_ref().map_or(0, |info| info.latest_event_nids.len())
        );

        Ok(Self {
            rooms,
            room_version: info
                .as_ref()
                .map(|info| info.room_version.clone())
                .unwrap_or_default(),
            context: Context::Write(txn),
            room_id: room_id.to_owned(),
            room_nid,
            info,
        })
    }

    /// An updater that only reads through `snapshot`.
    pub fn read_only(
        rooms: &'a super::Service,
        snapshot: Snapshot,
        room_id: &RoomId,
        room_nid: RoomNid,
    ) -> Result<RoomUpdater<'a>> {
        let info = rooms.metadata.room_info(&snapshot, room_nid)?;
        Ok(Self {
            rooms,
            room_version: info
                .as_ref()
                .map(|info| info.room_version.clone())
                .unwrap_or_default(),
            context: Context::ReadOnly(snapshot),
            room_id: room_id.to_owned(),
            room_nid,
            info,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn room_nid(&self) -> RoomNid {
        self.room_nid
    }

    pub fn room_exists(&self) -> bool {
        self.info.is_some()
    }

    pub fn room_version(&self) -> &str {
        &self.room_version
    }

    /// Only takes effect for a room that has no row yet.
    pub fn set_room_version(&mut self, room_version: &str) {
        if self.info.is_none() {
            self.room_version = room_version.to_owned();
        }
    }

    pub fn latest_events(&self) -> &[EventNid] {
        self.info
            .as_ref()
            .map_or(&[], |info| info.latest_event_nids.as_slice())
    }

    pub fn current_state_snapshot(&self) -> StateSnapshotNid {
        self.info
            .as_ref()
            .map(|info| info.state_snapshot_nid)
            .unwrap_or_default()
    }

    pub fn last_event_sent(&self) -> EventNid {
        self.info
            .as_ref()
            .map(|info| info.last_event_sent_nid)
            .unwrap_or_default()
    }

    pub fn view(&self) -> &dyn ReadView {
        match &self.context {
            Context::Write(txn) => txn,
            Context::ReadOnly(snapshot) => snapshot,
        }
    }

    pub fn txn_mut(&mut self) -> Result<&mut Transaction> {
        match &mut self.context {
            Context::Write(txn) => Ok(txn),
            Context::ReadOnly(_) => Err(Error::InvalidState(format!(
                "room updater for {} has no writable transaction",
                self.room_id
            ))),
        }
    }

    /// Moves the frontier and the state pointer.
    ///
    /// An empty frontier, a zero snapshot or a zero last sent event is a
    /// caller bug: the call fails and nothing is written.
    pub fn set_latest_events(
        &mut self,
        room_nid: RoomNid,
        latest_event_nids: Vec<EventNid>,
        last_event_sent_nid: EventNid,
        state_snapshot_nid: StateSnapshotNid,
    ) -> Result<()> {
        if room_nid != self.room_nid {
            return Err(Error::InvalidState(format!(
                "updater for room {} cannot update room {}",
                self.room_nid, room_nid
            )));
        }
        if latest_event_nids.is_empty() {
            return Err(Error::InvalidState(format!(
                "empty latest events for room {}",
                self.room_id
            )));
        }
        if state_snapshot_nid.is_zero() {
            return Err(Error::InvalidState(format!(
                "zero state snapshot for room {}",
                self.room_id
            )));
        }
        if last_event_sent_nid.is_zero() {
            return Err(Error::InvalidState(format!(
                "zero last sent event for room {}",
                self.room_id
            )));
        }

        let info = RoomInfo {
            room_nid,
            room_version: self.room_version.clone(),
            state_snapshot_nid,
            latest_event_nids,
            last_event_sent_nid,
        };
        let rooms = self.rooms;
        rooms.metadata.db.set_room_info(self.txn_mut()?, &info)?;
        self.info = Some(info);
        Ok(())
    }

    pub fn mark_event_as_sent(&mut self, event_nid: EventNid) -> Result<()> {
        let rooms = self.rooms;
        rooms.timeline.mark_event_as_sent(self.txn_mut()?, event_nid)
    }

    pub fn has_event_been_sent(&self, event_nid: EventNid) -> Result<bool> {
        self.rooms.timeline.has_event_been_sent(self.view(), event_nid)
    }

    pub fn is_referenced(&self, event_id: &EventId) -> Result<bool> {
        self.rooms.timeline.is_referenced(self.view(), event_id)
    }

    pub fn commit(self) -> Result<()> {
        match self.context {
            Context::Write(txn) => txn.commit(),
            Context::ReadOnly(_) => Ok(()),
        }
    }

    pub fn rollback(self) {
        if let Context::Write(txn) = self.context {
            txn.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ruma::room_id;

    use super::*;
    use crate::test_utils::test_services;

    #[tokio::test]
    async fn test_read_only_updater_refuses_writes() {
        let services = test_services();
        let rooms = &services.rooms;
        let room_id = room_id!("!room:example.org");
        let room_nid = rooms.short.get_or_create_room_nid(room_id).unwrap();

        let mut updater = RoomUpdater::read_only(rooms, services.snapshot(), room_id, room_nid).unwrap();
        assert!(!updater.room_exists());
        assert!(updater.latest_events().is_empty());

        let result = updater.set_latest_events(room_nid, vec![EventNid(1)], EventNid(1), StateSnapshotNid(1));
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert!(matches!(updater.mark_event_as_sent(EventNid(1)), Err(Error::InvalidState(_))));
        assert!(updater.commit().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_frontier_writes_nothing() {
        let services = test_services();
        let rooms = &services.rooms;
        let room_id = room_id!("!room:example.org");
        let room_nid = rooms.short.get_or_create_room_nid(room_id).unwrap();

        let mut updater = RoomUpdater::begin(rooms, services.begin(), room_id, room_nid).await.unwrap();
        let cases = [
            (Vec::new(), EventNid(1), StateSnapshotNid(1)),
            (vec![EventNid(1)], EventNid(1), StateSnapshotNid(0)),
            (vec![EventNid(1)], EventNid(0), StateSnapshotNid(1)),
        ];
        for (latest, last_sent, snapshot) in cases {
            let result = updater.set_latest_events(room_nid, latest, last_sent, snapshot);
            assert!(matches!(result, Err(Error::InvalidState(_))));
        }
        let result = updater.set_latest_events(RoomNid(room_nid.0 + 1), vec![EventNid(1)], EventNid(1), StateSnapshotNid(1));
        assert!(matches!(result, Err(Error::InvalidState(_))));
        updater.commit().unwrap();

        assert!(rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frontier_is_visible_after_commit() {
        let services = test_services();
        let rooms = &services.rooms;
        let room_id = room_id!("!room:example.org");
        let room_nid = rooms.short.get_or_create_room_nid(room_id).unwrap();

        let mut updater = RoomUpdater::begin(rooms, services.begin(), room_id, room_nid).await.unwrap();
        updater.set_room_version("10");
        updater
            .set_latest_events(room_nid, vec![EventNid(3), EventNid(4)], EventNid(4), StateSnapshotNid(2))
            .unwrap();
        assert_eq!(updater.latest_events(), [EventNid(3), EventNid(4)]);

        // Not visible before commit
        assert!(rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap().is_none());
        updater.commit().unwrap();

        let info = rooms.metadata.room_info(&services.snapshot(), room_nid).unwrap().unwrap();
        assert_eq!(info.latest_event_nids, vec![EventNid(3), EventNid(4)]);
        assert_eq!(info.state_snapshot_nid, StateSnapshotNid(2));
        assert_eq!(info.last_event_sent_nid, EventNid(4));
        assert_eq!(info.room_version, "10");

        // The version of an existing room is fixed
        let mut updater = RoomUpdater::begin(rooms, services.begin(), room_id, room_nid).await.unwrap();
        updater.set_room_version("11");
        assert_eq!(updater.room_version(), "10");
        updater.rollback();
    }

    #[tokio::test]
    async fn test_updaters_for_one_room_are_serialized() {
        let services = test_services();
        let rooms = &services.rooms;
        let room_id = room_id!("!room:example.org");
        let room_nid = rooms.short.get_or_create_room_nid(room_id).unwrap();

        let first = RoomUpdater::begin(rooms, services.begin(), room_id, room_nid).await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            RoomUpdater::begin(rooms, services.begin(), room_id, room_nid),
        )
        .await;
        assert!(blocked.is_err());

        let other = room_id!("!other:example.org");
        let other_nid = rooms.short.get_or_create_room_nid(other).unwrap();
        let unrelated = RoomUpdater::begin(rooms, services.begin(), other, other_nid).await.unwrap();
        unrelated.rollback();

        first.rollback();
        let second = tokio::time::timeout(
            Duration::from_millis(500),
            RoomUpdater::begin(rooms, services.begin(), room_id, room_nid),
        )
        .await;
        assert!(second.is_ok());
    }
}
