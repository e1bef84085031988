// =============================================================================
// Matrixon Streams - Database Module
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
//   `KeyValueDatabase` owns the storage engine, the tree names and the LRU
//   caches. The per-concern `Data` traits of the services are implemented
//   for it in `key_value/`.
//
// =============================================================================

pub mod abstraction;
pub mod key_value;

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use lru::LruCache;
use matrixon_core::types::{
    EventNid, EventStateKeyNid, EventTypeNid, RoomNid, StateBlockNid, StateEntry,
    StateSnapshotNid,
};
use ruma::{OwnedEventId, OwnedRoomId};
use tracing::info;

use self::abstraction::{Engine, KeyValueDatabaseEngine, Snapshot, Transaction};
use crate::{Config, Result};

/// Tree names. Key layouts are documented next to each name.
pub(crate) mod trees {
    /// StreamName = Position
    pub const STREAMID: &str = "streamid";
    /// CounterName = last assigned NID
    pub const COUNTERS: &str = "counters";

    pub const ROOMID_ROOMNID: &str = "roomid_roomnid";
    pub const ROOMNID_ROOMID: &str = "roomnid_roomid";
    pub const EVENTID_EVENTNID: &str = "eventid_eventnid";
    pub const EVENTNID_EVENTID: &str = "eventnid_eventid";
    pub const EVENTTYPE_TYPENID: &str = "eventtype_typenid";
    pub const TYPENID_EVENTTYPE: &str = "typenid_eventtype";
    pub const STATEKEY_STATEKEYNID: &str = "statekey_statekeynid";
    pub const STATEKEYNID_STATEKEY: &str = "statekeynid_statekey";

    /// EventNid = StoredEvent (json)
    pub const EVENTNID_EVENT: &str = "eventnid_event";
    /// PrevEventId + 0xff + EventId = ()
    pub const PREVEVENTID_EVENTID: &str = "preveventid_eventid";
    /// EventNid = ()
    pub const EVENTNID_SENT: &str = "eventnid_sent";
    /// RoomNid + EventNid = ()
    pub const ROOMNID_EVENTNID: &str = "roomnid_eventnid";
    /// RoomNid = RoomInfo (json)
    pub const ROOMNID_ROOMINFO: &str = "roomnid_roominfo";
    /// RoomId, only ever locked
    pub const ROOM_LOCKS: &str = "room_locks";

    /// Hash = StateBlockNid
    pub const STATEBLOCKHASH_BLOCKNID: &str = "stateblockhash_blocknid";
    /// StateBlockNid = sorted (TypeNid, StateKeyNid, EventNid) triples
    pub const BLOCKNID_STATEBLOCK: &str = "blocknid_stateblock";
    /// Hash = StateSnapshotNid
    pub const SNAPSHOTHASH_SNAPSHOTNID: &str = "snapshothash_snapshotnid";
    /// StateSnapshotNid = StoredSnapshot (json)
    pub const SNAPSHOTNID_SNAPSHOT: &str = "snapshotnid_snapshot";
    /// RoomNid + StateSnapshotNid = ()
    pub const ROOMNID_SNAPSHOTNID: &str = "roomnid_snapshotnid";

    /// Position = EventNid
    pub const PDUSTREAM_EVENTNID: &str = "pdustream_eventnid";
    /// RoomId + 0xff + Position = EventNid
    pub const ROOMPDUSTREAM_EVENTNID: &str = "roompdustream_eventnid";
    /// EventNid = Position
    pub const EVENTNID_PDUSTREAM: &str = "eventnid_pdustream";

    /// RoomId + 0xff + Depth + Position = EventId
    pub const TOPOLOGY_EVENTID: &str = "topology_eventid";
    /// EventId = RoomId + 0xff + Depth + Position
    pub const EVENTID_TOPOLOGY: &str = "eventid_topology";

    /// RoomId + 0xff + UserId = MembershipRecord (json)
    pub const ROOMUSERID_MEMBERSHIP: &str = "roomuserid_membership";
    /// UserId + 0xff + RoomId = MembershipRecord (json)
    pub const USERROOMID_MEMBERSHIP: &str = "userroomid_membership";
    /// UserId + 0xff + Position = InviteRecord (json)
    pub const USERINVITEID_INVITE: &str = "userinviteid_invite";
    /// UserId + 0xff + RoomId = Position
    pub const USERROOMID_INVITEPOSITION: &str = "userroomid_inviteposition";

    /// Position = ReceiptRecord (json)
    pub const RECEIPTID_RECEIPT: &str = "receiptid_receipt";
    /// RoomId + 0xff + ReceiptType + 0xff + UserId = Position
    pub const ROOMTYPEUSERID_RECEIPTID: &str = "roomtypeuserid_receiptid";

    /// Position = AccountDataRecord (json)
    pub const ACCOUNTDATAID_ACCOUNTDATA: &str = "accountdataid_accountdata";
    /// UserId + 0xff + RoomId + 0xff + Type = Position
    pub const USERROOMTYPE_ACCOUNTDATAID: &str = "userroomtype_accountdataid";

    /// Position = PresenceRecord (json)
    pub const PRESENCEID_PRESENCE: &str = "presenceid_presence";
    /// UserId = Position
    pub const USERID_PRESENCEID: &str = "userid_presenceid";

    /// Position = RelationRecord (json)
    pub const RELATIONID_RELATION: &str = "relationid_relation";
    /// ParentEventId + 0xff + Position = RelationRecord (json)
    pub const PARENT_RELATIONID: &str = "parent_relationid";

    /// Position = UserId
    pub const KEYCHANGEID_USERID: &str = "keychangeid_userid";
    /// UserId = Position
    pub const USERID_KEYCHANGEID: &str = "userid_keychangeid";

    /// UserId + 0xff + DeviceId + 0xff + Position = message (json)
    pub const TODEVICEID_EVENTS: &str = "todeviceid_events";

    /// Position = NotificationRecord (json)
    pub const NOTIFICATIONID_NOTIFICATION: &str = "notificationid_notification";
    /// UserId + 0xff + RoomId = Position
    pub const USERROOMID_NOTIFICATIONID: &str = "userroomid_notificationid";

    /// Topic + 0xff + Offset = message (json)
    pub const TOPICID_MESSAGE: &str = "topicid_message";
    /// ConsumerName = last acknowledged offset
    pub const CONSUMER_OFFSET: &str = "consumer_offset";
}

pub struct KeyValueDatabase {
    pub(crate) engine: Arc<Engine>,
    pub(crate) config: Config,

    pub(super) roomid_roomnid_cache: Mutex<LruCache<OwnedRoomId, RoomNid>>,
    pub(super) eventid_eventnid_cache: Mutex<LruCache<OwnedEventId, EventNid>>,
    pub(super) eventnid_eventid_cache: Mutex<LruCache<EventNid, OwnedEventId>>,
    pub(super) eventtype_typenid_cache: Mutex<LruCache<String, EventTypeNid>>,
    pub(super) statekey_statekeynid_cache: Mutex<LruCache<String, EventStateKeyNid>>,
    pub(super) stateblock_cache: Mutex<LruCache<StateBlockNid, Arc<Vec<StateEntry>>>>,
    pub(super) snapshot_cache: Mutex<LruCache<StateSnapshotNid, Arc<Vec<StateBlockNid>>>>,
}

fn cache<K: std::hash::Hash + Eq, V>(config: &Config, base: usize) -> Mutex<LruCache<K, V>> {
    let capacity = NonZeroUsize::new(config.cache_capacity(base)).unwrap_or(NonZeroUsize::MIN);
    Mutex::new(LruCache::new(capacity))
}

impl KeyValueDatabase {
    /// Load an existing database or create a new one.
    pub fn load_or_create(config: &Config) -> Result<Arc<Self>> {
        config.validate()?;
        let engine = Engine::open(config)?;
        info!(
            "🗄️ Database ready ({})",
            config
                .database_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "volatile".to_owned())
        );

        Ok(Arc::new(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            roomid_roomnid_cache: cache(config, 10_000),
            eventid_eventnid_cache: cache(config, 100_000),
            eventnid_eventid_cache: cache(config, 100_000),
            eventtype_typenid_cache: cache(config, 1_000),
            statekey_statekeynid_cache: cache(config, 100_000),
            stateblock_cache: cache(config, 10_000),
            snapshot_cache: cache(config, 10_000),
        }))
    }

    /// Starts a read-committed transaction.
    pub fn begin(&self) -> Transaction {
        self.engine.begin()
    }

    /// Opens a consistent, repeatable-read view.
    pub fn snapshot(&self) -> Snapshot {
        self.engine.snapshot()
    }

    pub fn flush(&self) -> Result<()> {
        self.engine.flush()
    }

    pub fn memory_usage(&self) -> Result<String> {
        let mut out = self.engine.memory_usage()?;
        let lock = |len: usize, name: &str| format!("{name}: {len}\n");
        out.push_str(&lock(
            self.eventid_eventnid_cache.lock().unwrap_or_else(|e| e.into_inner()).len(),
            "eventid_eventnid_cache",
        ));
        out.push_str(&lock(
            self.stateblock_cache.lock().unwrap_or_else(|e| e.into_inner()).len(),
            "stateblock_cache",
        ));
        out.push_str(&lock(
            self.snapshot_cache.lock().unwrap_or_else(|e| e.into_inner()).len(),
            "snapshot_cache",
        ));
        Ok(out)
    }
}

/// Joins key parts with the `0xff` separator.
pub(crate) fn key(parts: &[&[u8]]) -> Vec<u8> {
    parts.join(&0xff)
}

/// `parts` joined with `0xff`, with a trailing separator, for prefix scans.
pub(crate) fn prefix(parts: &[&[u8]]) -> Vec<u8> {
    let mut prefix = key(parts);
    prefix.push(0xff);
    prefix
}
