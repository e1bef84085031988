// =============================================================================
// Matrixon Streams - Room User Storage
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

use matrixon_core::types::StreamPosition;
use ruma::{RoomId, UserId};

use crate::{
    database::{
        abstraction::{ReadView, Transaction},
        key, trees, KeyValueDatabase,
    },
    service::{self, rooms::user::NotificationRecord},
    utils, Error, Result,
};

fn parse(bytes: &[u8]) -> Result<NotificationRecord> {
    serde_json::from_slice(bytes)
        .map_err(|_| Error::bad_database("Invalid record in notificationid_notification."))
}

impl service::rooms::user::Data for KeyValueDatabase {
    fn update_notification_counts(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &NotificationRecord,
    ) -> Result<()> {
        let userroom_id = key(&[record.user_id.as_bytes(), record.room_id.as_bytes()]);
        if let Some(old) = txn.get(trees::USERROOMID_NOTIFICATIONID, &userroom_id)? {
            txn.remove(trees::NOTIFICATIONID_NOTIFICATION, &old);
        }
        txn.insert(
            trees::NOTIFICATIONID_NOTIFICATION,
            &position.to_be_bytes(),
            &serde_json::to_vec(record)?,
        );
        txn.insert(trees::USERROOMID_NOTIFICATIONID, &userroom_id, &position.to_be_bytes());
        Ok(())
    }

    fn notification_counts(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Option<NotificationRecord>> {
        let userroom_id = key(&[user_id.as_bytes(), room_id.as_bytes()]);
        let Some(position) = view.get(trees::USERROOMID_NOTIFICATIONID, &userroom_id)? else {
            return Ok(None);
        };
        view.get(trees::NOTIFICATIONID_NOTIFICATION, &position)?
            .map(|value| parse(&value))
            .transpose()
    }

    fn notifications_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, NotificationRecord)>> {
        let mut out = Vec::new();
        for (position, value) in view.scan(
            trees::NOTIFICATIONID_NOTIFICATION,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )? {
            let record = parse(&value)?;
            if record.user_id.as_str() == user_id.as_str() {
                out.push((utils::u64_from_bytes(&position)?, record));
            }
        }
        Ok(out)
    }

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        let mut removed = 0;
        for (position, value) in txn.scan_prefix(trees::NOTIFICATIONID_NOTIFICATION, b"", false)? {
            let record = parse(&value)?;
            if record.room_id.as_str() == room_id.as_str() {
                txn.remove(trees::NOTIFICATIONID_NOTIFICATION, &position);
                txn.remove(
                    trees::USERROOMID_NOTIFICATIONID,
                    &key(&[record.user_id.as_bytes(), room_id.as_bytes()]),
                );
                removed += 1;
            }
        }
        Ok(removed)
    }
}
