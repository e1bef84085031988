// =============================================================================
// Matrixon Streams - Room Metadata Storage
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use async_trait::async_trait;
use matrixon_core::types::RoomNid;
use ruma::RoomId;

use crate::{
    database::{
        abstraction::{ReadView, Transaction},
        trees, KeyValueDatabase,
    },
    service::{self, rooms::metadata::RoomInfo},
    Error, Result,
};

#[async_trait]
impl service::rooms::metadata::Data for KeyValueDatabase {
    async fn lock_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<()> {
        txn.lock_row(trees::ROOM_LOCKS, room_id.as_bytes()).await;
        Ok(())
    }

    fn room_info(&self, view: &dyn ReadView, room_nid: RoomNid) -> Result<Option<RoomInfo>> {
        view.get(trees::ROOMNID_ROOMINFO, &room_nid.to_be_bytes())?
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|_| Error::bad_database("Invalid room info in roomnid_roominfo."))
            })
            .transpose()
    }

    fn set_room_info(&self, txn: &mut Transaction, info: &RoomInfo) -> Result<()> {
        txn.insert(
            trees::ROOMNID_ROOMINFO,
            &info.room_nid.to_be_bytes(),
            &serde_json::to_vec(info)?,
        );
        Ok(())
    }

    fn remove_room_info(&self, txn: &mut Transaction, room_nid: RoomNid) -> Result<()> {
        txn.remove(trees::ROOMNID_ROOMINFO, &room_nid.to_be_bytes());
        Ok(())
    }
}
