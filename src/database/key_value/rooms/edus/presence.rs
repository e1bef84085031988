// =============================================================================
// Matrixon Streams - Presence Storage
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
use ruma::UserId;

use crate::{
    database::{
        abstraction::{ReadView, Transaction},
        trees, KeyValueDatabase,
    },
    service::{self, rooms::edus::presence::PresenceRecord},
    utils, Error, Result,
};

fn parse(bytes: &[u8]) -> Result<PresenceRecord> {
    serde_json::from_slice(bytes).map_err(|_| Error::bad_database("Invalid record in presenceid_presence."))
}

impl service::rooms::edus::presence::Data for KeyValueDatabase {
    fn set_presence(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &PresenceRecord,
    ) -> Result<()> {
        if let Some(old) = txn.get(trees::USERID_PRESENCEID, record.user_id.as_bytes())? {
            txn.remove(trees::PRESENCEID_PRESENCE, &old);
        }
        txn.insert(trees::PRESENCEID_PRESENCE, &position.to_be_bytes(), &serde_json::to_vec(record)?);
        txn.insert(trees::USERID_PRESENCEID, record.user_id.as_bytes(), &position.to_be_bytes());
        Ok(())
    }

    fn get_presence(&self, view: &dyn ReadView, user_id: &UserId) -> Result<Option<(StreamPosition, PresenceRecord)>> {
        let Some(position) = view.get(trees::USERID_PRESENCEID, user_id.as_bytes())? else {
            return Ok(None);
        };
        view.get(trees::PRESENCEID_PRESENCE, &position)?
            .map(|value| Ok((utils::u64_from_bytes(&position)?, parse(&value)?)))
            .transpose()
    }

    fn presence_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, PresenceRecord)>> {
        view.scan(
            trees::PRESENCEID_PRESENCE,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )?
        .into_iter()
        .map(|(position, value)| Ok((utils::u64_from_bytes(&position)?, parse(&value)?)))
        .collect()
    }
}
