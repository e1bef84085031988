// =============================================================================
// Matrixon Streams - Membership Storage
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
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};

use crate::{
    database::{
        abstraction::{ReadView, Transaction},
        key, prefix, trees, KeyValueDatabase,
    },
    service::{
        self,
        rooms::state_cache::{InviteRecord, MembershipRecord},
    },
    utils, Error, Result,
};

fn parse_record<T: serde::de::DeserializeOwned>(bytes: &[u8], tree: &'static str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|_| Error::bad_database(tree))
}

/// The part of a key after the last `0xff`.
fn last_part(key: &[u8]) -> Result<String> {
    let start = key
        .iter()
        .rposition(|b| *b == 0xff)
        .ok_or_else(|| Error::bad_database("Key has no separator."))?;
    utils::string_from_bytes(&key[start + 1..])
}

fn position_suffix(key: &[u8]) -> Result<StreamPosition> {
    key.len()
        .checked_sub(8)
        .ok_or_else(|| Error::bad_database("Invalid key in userinviteid_invite."))
        .and_then(|start| utils::u64_from_bytes(&key[start..]))
}

impl service::rooms::state_cache::Data for KeyValueDatabase {
    fn set_membership(
        &self,
        txn: &mut Transaction,
        room_id: &RoomId,
        user_id: &UserId,
        record: &MembershipRecord,
    ) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        txn.insert(
            trees::ROOMUSERID_MEMBERSHIP,
            &key(&[room_id.as_bytes(), user_id.as_bytes()]),
            &value,
        );
        txn.insert(
            trees::USERROOMID_MEMBERSHIP,
            &key(&[user_id.as_bytes(), room_id.as_bytes()]),
            &value,
        );
        Ok(())
    }

    fn membership(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<MembershipRecord>> {
        view.get(
            trees::ROOMUSERID_MEMBERSHIP,
            &key(&[room_id.as_bytes(), user_id.as_bytes()]),
        )?
        .map(|bytes| parse_record(&bytes, "Invalid record in roomuserid_membership."))
        .transpose()
    }

    fn room_members(
        &self,
        view: &dyn ReadView,
        room_id: &RoomId,
    ) -> Result<Vec<(OwnedUserId, MembershipRecord)>> {
        view.scan_prefix(trees::ROOMUSERID_MEMBERSHIP, &prefix(&[room_id.as_bytes()]), false)?
            .into_iter()
            .map(|(key, value)| {
                let user_id = UserId::parse(last_part(&key)?)
                    .map_err(|_| Error::bad_database("Invalid user ID in roomuserid_membership."))?;
                Ok((user_id, parse_record(&value, "Invalid record in roomuserid_membership.")?))
            })
            .collect()
    }

    fn rooms_for_user(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
    ) -> Result<Vec<(OwnedRoomId, MembershipRecord)>> {
        view.scan_prefix(trees::USERROOMID_MEMBERSHIP, &prefix(&[user_id.as_bytes()]), false)?
            .into_iter()
            .map(|(key, value)| {
                let room_id = RoomId::parse(last_part(&key)?)
                    .map_err(|_| Error::bad_database("Invalid room ID in userroomid_membership."))?;
                Ok((room_id, parse_record(&value, "Invalid record in userroomid_membership.")?))
            })
            .collect()
    }

    fn add_invite(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        position: StreamPosition,
        record: &InviteRecord,
    ) -> Result<()> {
        txn.insert(
            trees::USERINVITEID_INVITE,
            &key(&[user_id.as_bytes(), &position.to_be_bytes()]),
            &serde_json::to_vec(record)?,
        );
        txn.insert(
            trees::USERROOMID_INVITEPOSITION,
            &key(&[user_id.as_bytes(), record.room_id.as_bytes()]),
            &position.to_be_bytes(),
        );
        Ok(())
    }

    fn latest_invite(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Option<(StreamPosition, InviteRecord)>> {
        let Some(position) = view.get(
            trees::USERROOMID_INVITEPOSITION,
            &key(&[user_id.as_bytes(), room_id.as_bytes()]),
        )?
        else {
            return Ok(None);
        };
        let position = utils::u64_from_bytes(&position)?;
        view.get(
            trees::USERINVITEID_INVITE,
            &key(&[user_id.as_bytes(), &position.to_be_bytes()]),
        )?
        .map(|bytes| {
            Ok((
                position,
                parse_record(&bytes, "Invalid record in userinviteid_invite.")?,
            ))
        })
        .transpose()
    }

    fn invites_in_range(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, InviteRecord)>> {
        view.scan(
            trees::USERINVITEID_INVITE,
            Bound::Excluded(key(&[user_id.as_bytes(), &from.to_be_bytes()])),
            Bound::Included(key(&[user_id.as_bytes(), &to.to_be_bytes()])),
            false,
            None,
        )?
        .into_iter()
        .map(|(key, value)| {
            Ok((
                position_suffix(&key)?,
                parse_record(&value, "Invalid record in userinviteid_invite.")?,
            ))
        })
        .collect()
    }

    fn remove_room(&self, txn: &mut Transaction, room_id: &RoomId) -> Result<()> {
        let members = service::rooms::state_cache::Data::room_members(self, &*txn, room_id)?;
        for (user_id, _) in members {
            txn.remove(
                trees::ROOMUSERID_MEMBERSHIP,
                &key(&[room_id.as_bytes(), user_id.as_bytes()]),
            );
            txn.remove(
                trees::USERROOMID_MEMBERSHIP,
                &key(&[user_id.as_bytes(), room_id.as_bytes()]),
            );
            txn.remove(
                trees::USERROOMID_INVITEPOSITION,
                &key(&[user_id.as_bytes(), room_id.as_bytes()]),
            );

            let invites = txn.scan_prefix(trees::USERINVITEID_INVITE, &prefix(&[user_id.as_bytes()]), false)?;
            for (key, value) in invites {
                let record: InviteRecord = parse_record(&value, "Invalid record in userinviteid_invite.")?;
                if record.room_id.as_str() == room_id.as_str() {
                    txn.remove(trees::USERINVITEID_INVITE, &key);
                }
            }
        }
        Ok(())
    }
}
