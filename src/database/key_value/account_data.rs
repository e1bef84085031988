// =============================================================================
// Matrixon Streams - Account Data Storage
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
        key, prefix, trees, KeyValueDatabase,
    },
    service::{self, account_data::AccountDataRecord},
    utils, Error, Result,
};

fn parse(bytes: &[u8]) -> Result<AccountDataRecord> {
    serde_json::from_slice(bytes)
        .map_err(|_| Error::bad_database("Invalid record in accountdataid_accountdata."))
}

fn roomuserdataid(user_id: &UserId, room_id: Option<&RoomId>, kind: &str) -> Vec<u8> {
    key(&[
        user_id.as_bytes(),
        room_id.map(|r| r.as_bytes()).unwrap_or_default(),
        kind.as_bytes(),
    ])
}

impl service::account_data::Data for KeyValueDatabase {
    fn update(&self, txn: &mut Transaction, position: StreamPosition, record: &AccountDataRecord) -> Result<()> {
        let latest = roomuserdataid(&record.user_id, record.room_id.as_deref(), &record.kind);

        // Remove old entry
        if let Some(old) = txn.get(trees::USERROOMTYPE_ACCOUNTDATAID, &latest)? {
            txn.remove(trees::ACCOUNTDATAID_ACCOUNTDATA, &old);
        }

        txn.insert(
            trees::ACCOUNTDATAID_ACCOUNTDATA,
            &position.to_be_bytes(),
            &serde_json::to_vec(record)?,
        );
        txn.insert(trees::USERROOMTYPE_ACCOUNTDATAID, &latest, &position.to_be_bytes());
        Ok(())
    }

    fn get(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: Option<&RoomId>,
        kind: &str,
    ) -> Result<Option<AccountDataRecord>> {
        let Some(position) = view.get(trees::USERROOMTYPE_ACCOUNTDATAID, &roomuserdataid(user_id, room_id, kind))?
        else {
            return Ok(None);
        };
        view.get(trees::ACCOUNTDATAID_ACCOUNTDATA, &position)?
            .map(|value| parse(&value))
            .transpose()
    }

    fn changes_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, AccountDataRecord)>> {
        let mut changes = Vec::new();
        for (position, value) in view.scan(
            trees::ACCOUNTDATAID_ACCOUNTDATA,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )? {
            let record = parse(&value)?;
            if record.user_id.as_str() == user_id.as_str() {
                changes.push((utils::u64_from_bytes(&position)?, record));
            }
        }
        Ok(changes)
    }

    fn all(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Vec<AccountDataRecord>> {
        view.scan_prefix(trees::USERROOMTYPE_ACCOUNTDATAID, &prefix(&[user_id.as_bytes()]), false)?
            .into_iter()
            .filter_map(|(_, position)| view.get(trees::ACCOUNTDATAID_ACCOUNTDATA, &position).transpose())
            .map(|value| parse(&value?))
            .collect()
    }
}
