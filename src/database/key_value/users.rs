// =============================================================================
// Matrixon Streams - Users Storage
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
use ruma::{DeviceId, OwnedUserId, UserId};
use serde_json::Value;

use crate::{
    database::{
        abstraction::{ReadView, Transaction},
        key, prefix, trees, KeyValueDatabase,
    },
    service, utils, Error, Result,
};

impl service::users::Data for KeyValueDatabase {
    fn mark_device_key_update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        user_id: &UserId,
    ) -> Result<()> {
        if let Some(old) = txn.get(trees::USERID_KEYCHANGEID, user_id.as_bytes())? {
            txn.remove(trees::KEYCHANGEID_USERID, &old);
        }
        txn.insert(trees::KEYCHANGEID_USERID, &position.to_be_bytes(), user_id.as_bytes());
        txn.insert(trees::USERID_KEYCHANGEID, user_id.as_bytes(), &position.to_be_bytes());
        Ok(())
    }

    fn keys_changed(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, OwnedUserId)>> {
        view.scan(
            trees::KEYCHANGEID_USERID,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )?
        .into_iter()
        .map(|(position, user_id)| {
            let user_id = UserId::parse(utils::string_from_bytes(&user_id)?)
                .map_err(|_| Error::bad_database("User ID in keychangeid_userid is invalid."))?;
            Ok((utils::u64_from_bytes(&position)?, user_id))
        })
        .collect()
    }

    fn add_to_device_event(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        target_user_id: &UserId,
        target_device_id: &DeviceId,
        event: &Value,
    ) -> Result<()> {
        let key = key(&[
            target_user_id.as_bytes(),
            target_device_id.as_bytes(),
            &position.to_be_bytes(),
        ]);
        txn.insert(trees::TODEVICEID_EVENTS, &key, &serde_json::to_vec(event)?);
        Ok(())
    }

    fn get_to_device_events(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        device_id: &DeviceId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, Value)>> {
        let prefix = prefix(&[user_id.as_bytes(), device_id.as_bytes()]);
        let bound = |position: StreamPosition| {
            let mut key = prefix.clone();
            key.extend_from_slice(&position.to_be_bytes());
            key
        };

        view.scan(
            trees::TODEVICEID_EVENTS,
            Bound::Excluded(bound(from)),
            Bound::Included(bound(to)),
            false,
            None,
        )?
        .into_iter()
        .map(|(key, value)| {
            let position = utils::u64_from_bytes(&key[prefix.len()..])
                .map_err(|_| Error::bad_database("ToDeviceId has invalid count bytes."))?;
            let event = serde_json::from_slice(&value)
                .map_err(|_| Error::bad_database("Invalid to-device event in database."))?;
            Ok((position, event))
        })
        .collect()
    }

    fn remove_to_device_events(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        device_id: &DeviceId,
        until: StreamPosition,
    ) -> Result<usize> {
        let prefix = prefix(&[user_id.as_bytes(), device_id.as_bytes()]);
        let mut last = prefix.clone();
        last.extend_from_slice(&until.to_be_bytes());

        let rows = txn.scan(
            trees::TODEVICEID_EVENTS,
            Bound::Included(prefix),
            Bound::Included(last),
            false,
            None,
        )?;
        for (key, _) in &rows {
            txn.remove(trees::TODEVICEID_EVENTS, key);
        }
        Ok(rows.len())
    }
}
