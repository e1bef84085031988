// =============================================================================
// Matrixon Streams - Typing Service
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
//   Who is typing where. Kept in memory only: the typing stream restarts at
//   zero with the process, and every change takes the next position.
//
// =============================================================================

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use matrixon_core::types::StreamPosition;
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::utils;

pub struct Service {
    /// Room -> user -> unix millis at which the user stops typing
    typing: RwLock<BTreeMap<OwnedRoomId, BTreeMap<OwnedUserId, u64>>>,
    /// Room -> position of the last change to its typing users
    last_typing_update: RwLock<BTreeMap<OwnedRoomId, StreamPosition>>,
    position: AtomicU64,
    max_timeout_ms: u64,
}

impl Service {
    pub fn new(max_timeout_ms: u64) -> Self {
        Self {
            typing: RwLock::new(BTreeMap::new()),
            last_typing_update: RwLock::new(BTreeMap::new()),
            position: AtomicU64::new(0),
            max_timeout_ms,
        }
    }

    /// Latest typing position.
    pub fn position(&self) -> StreamPosition {
        self.position.load(Ordering::SeqCst)
    }

    async fn bump(&self, room_id: &RoomId) -> StreamPosition {
        let mut updates = self.last_typing_update.write().await;
        let position = self.position.fetch_add(1, Ordering::SeqCst) + 1;
        updates.insert(room_id.to_owned(), position);
        position
    }

    /// Sets a user as typing for `timeout_ms`, capped by the configured
    /// maximum. Returns the new typing position.
    pub async fn typing_add(&self, user_id: &UserId, room_id: &RoomId, timeout_ms: u64) -> StreamPosition {
        let until = utils::millis_since_unix_epoch() + timeout_ms.min(self.max_timeout_ms);
        self.typing
            .write()
            .await
            .entry(room_id.to_owned())
            .or_default()
            .insert(user_id.to_owned(), until);
        self.bump(room_id).await
    }

    /// Removes a user from typing before the timeout is reached. `None` if
    /// the user was not typing.
    pub async fn typing_remove(&self, user_id: &UserId, room_id: &RoomId) -> Option<StreamPosition> {
        let removed = self
            .typing
            .write()
            .await
            .get_mut(room_id)
            .and_then(|users| users.remove(user_id))
            .is_some();
        if removed {
            Some(self.bump(room_id).await)
        } else {
            None
        }
    }

    /// Drops expired typing users. Returns the rooms that changed with their
    /// new positions.
    pub async fn typings_maintain(&self) -> Vec<(OwnedRoomId, StreamPosition)> {
        let now = utils::millis_since_unix_epoch();
        let mut changed_rooms = Vec::new();
        {
            let mut typing = self.typing.write().await;
            for (room_id, users) in typing.iter_mut() {
                let before = users.len();
                users.retain(|_, until| *until >= now);
                if users.len() != before {
                    changed_rooms.push(room_id.clone());
                }
            }
            typing.retain(|_, users| !users.is_empty());
        }

        let mut changed = Vec::with_capacity(changed_rooms.len());
        for room_id in changed_rooms {
            let position = self.bump(&room_id).await;
            debug!("Typing timed out in {}", room_id);
            changed.push((room_id, position));
        }
        changed
    }

    /// Position of the last change in this room, 0 if it never changed.
    pub async fn last_typing_update(&self, room_id: &RoomId) -> StreamPosition {
        self.last_typing_update
            .read()
            .await
            .get(room_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn typings_all(&self, room_id: &RoomId) -> Vec<OwnedUserId> {
        self.typing
            .read()
            .await
            .get(room_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use ruma::{room_id, user_id};

    use super::*;

    #[tokio::test]
    async fn test_every_change_takes_a_position() {
        let service = Service::new(30_000);
        let room = room_id!("!room:example.org");

        let first = service.typing_add(user_id!("@alice:example.org"), room, 10_000).await;
        let second = service.typing_add(user_id!("@bob:example.org"), room, 10_000).await;
        assert_eq!((first, second), (1, 2));
        assert_eq!(service.typings_all(room).await.len(), 2);

        let removed = service.typing_remove(user_id!("@alice:example.org"), room).await;
        assert_eq!(removed, Some(3));
        assert_eq!(service.typing_remove(user_id!("@alice:example.org"), room).await, None);
        assert_eq!(service.last_typing_update(room).await, 3);
        assert_eq!(service.last_typing_update(room_id!("!other:example.org")).await, 0);
    }

    #[tokio::test]
    async fn test_expired_users_are_removed() {
        let service = Service::new(0);
        let room = room_id!("!room:example.org");
        service.typing_add(user_id!("@alice:example.org"), room, 60_000).await;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let changed = service.typings_maintain().await;
        assert_eq!(changed, vec![(room.to_owned(), 2)]);
        assert!(service.typings_all(room).await.is_empty());
        assert!(service.typings_maintain().await.is_empty());
    }
}
