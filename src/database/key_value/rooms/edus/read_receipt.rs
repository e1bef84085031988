// =============================================================================
// Matrixon Streams - Read Receipt Storage
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
use ruma::RoomId;

use crate::{
    database::{
        abstraction::{ReadView, Transaction},
        key, prefix, trees, KeyValueDatabase,
    },
    service::{self, rooms::edus::read_receipt::ReceiptRecord},
    utils, Error, Result,
};

fn parse(bytes: &[u8]) -> Result<ReceiptRecord> {
    serde_json::from_slice(bytes).map_err(|_| Error::bad_database("Invalid record in receiptid_receipt."))
}

fn latest_key(record: &ReceiptRecord) -> Vec<u8> {
    key(&[
        record.room_id.as_bytes(),
        record.receipt_type.as_bytes(),
        record.user_id.as_bytes(),
    ])
}

impl service::rooms::edus::read_receipt::Data for KeyValueDatabase {
    fn readreceipt_update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        record: &ReceiptRecord,
    ) -> Result<()> {
        let latest = latest_key(record);

        // Remove old entry
        if let Some(old) = txn.get(trees::ROOMTYPEUSERID_RECEIPTID, &latest)? {
            txn.remove(trees::RECEIPTID_RECEIPT, &old);
        }

        txn.insert(trees::RECEIPTID_RECEIPT, &position.to_be_bytes(), &serde_json::to_vec(record)?);
        txn.insert(trees::ROOMTYPEUSERID_RECEIPTID, &latest, &position.to_be_bytes());
        Ok(())
    }

    fn readreceipts_in_range(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, ReceiptRecord)>> {
        view.scan(
            trees::RECEIPTID_RECEIPT,
            Bound::Excluded(from.to_be_bytes().to_vec()),
            Bound::Included(to.to_be_bytes().to_vec()),
            false,
            None,
        )?
        .into_iter()
        .map(|(position, value)| Ok((utils::u64_from_bytes(&position)?, parse(&value)?)))
        .collect()
    }

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<usize> {
        let rows = txn.scan_prefix(trees::ROOMTYPEUSERID_RECEIPTID, &prefix(&[room_id.as_bytes()]), false)?;
        for (latest, position) in &rows {
            txn.remove(trees::ROOMTYPEUSERID_RECEIPTID, latest);
            txn.remove(trees::RECEIPTID_RECEIPT, position);
        }
        Ok(rows.len())
    }
}
