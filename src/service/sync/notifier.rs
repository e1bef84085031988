// =============================================================================
// Matrixon Streams - Notifier
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
//   Wakes blocked long-poll sync requests. Every stream producer reports its
//   new position together with the rooms and users the change concerns; only
//   listeners whose scope intersects the change are woken.
//
// =============================================================================

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use matrixon_core::types::{StreamKind, StreamPosition, StreamSet, StreamingToken};
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use tokio::sync::Notify;
use tracing::{debug, trace};

struct Waiter {
    user_id: OwnedUserId,
    rooms: HashSet<OwnedRoomId>,
    streams: StreamSet,
    since: StreamingToken,
    /// Highest relevant position seen per stream since registration.
    pending: StreamingToken,
    notify: Arc<Notify>,
}

impl Waiter {
    fn is_satisfied(&self) -> bool {
        self.pending.is_after_in(&self.since, self.streams)
    }
}

#[derive(Default)]
pub struct Notifier {
    current: Mutex<StreamingToken>,
    waiters: Arc<Mutex<HashMap<u64, Waiter>>>,
    next_id: AtomicU64,
}

/// A registered interest in new data. Dropping it deregisters.
pub struct Listener {
    id: u64,
    notify: Arc<Notify>,
    waiters: Arc<Mutex<HashMap<u64, Waiter>>>,
}

impl Notifier {
    /// Sets the baseline, normally from the persisted stream counters.
    pub fn set_current_position(&self, token: StreamingToken) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = token;
    }

    pub fn current_position(&self) -> StreamingToken {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a listener for changes on `streams` that concern `user_id`
    /// or one of `rooms`.
    pub fn listen(
        &self,
        user_id: &UserId,
        rooms: impl IntoIterator<Item = OwnedRoomId>,
        streams: StreamSet,
        since: StreamingToken,
    ) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        let mut waiters = self.lock_waiters();
        waiters.insert(
            id,
            Waiter {
                user_id: user_id.to_owned(),
                rooms: rooms.into_iter().collect(),
                streams,
                since,
                pending: StreamingToken::default(),
                notify: Arc::clone(&notify),
            },
        );
        metrics::gauge!("matrixon_notifier_waiters").set(waiters.len() as f64);
        trace!("Listener {} registered for {}", id, user_id);

        Listener {
            id,
            notify,
            waiters: Arc::clone(&self.waiters),
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.lock_waiters().len()
    }

    /// A PDU was published in `room_id`. `users` are members whose
    /// membership changed, so they may not be in the room yet.
    pub fn on_new_event(&self, position: StreamPosition, room_id: &RoomId, users: &[&UserId]) {
        self.on_new(StreamKind::Pdu, position, &[room_id], users);
    }

    pub fn on_new_typing(&self, position: StreamPosition, room_id: &RoomId) {
        self.on_new(StreamKind::Typing, position, &[room_id], &[]);
    }

    pub fn on_new_receipt(&self, position: StreamPosition, room_id: &RoomId) {
        self.on_new(StreamKind::Receipt, position, &[room_id], &[]);
    }

    pub fn on_new_relation(&self, position: StreamPosition, room_id: &RoomId) {
        self.on_new(StreamKind::Relations, position, &[room_id], &[]);
    }

    pub fn on_new_invite(&self, position: StreamPosition, user_id: &UserId) {
        self.on_new(StreamKind::Invite, position, &[], &[user_id]);
    }

    pub fn on_new_send_to_device(&self, position: StreamPosition, user_id: &UserId) {
        self.on_new(StreamKind::SendToDevice, position, &[], &[user_id]);
    }

    pub fn on_new_account_data(&self, position: StreamPosition, user_id: &UserId) {
        self.on_new(StreamKind::AccountData, position, &[], &[user_id]);
    }

    pub fn on_new_notification_data(&self, position: StreamPosition, user_id: &UserId) {
        self.on_new(StreamKind::NotificationData, position, &[], &[user_id]);
    }

    /// Key changes and presence concern everyone sharing a room with the
    /// user, so the caller passes the user's rooms.
    pub fn on_new_key_change(&self, position: StreamPosition, user_id: &UserId, rooms: &[&RoomId]) {
        self.on_new(StreamKind::DeviceList, position, rooms, &[user_id]);
    }

    pub fn on_new_presence(&self, position: StreamPosition, user_id: &UserId, rooms: &[&RoomId]) {
        self.on_new(StreamKind::Presence, position, rooms, &[user_id]);
    }

    /// Advances `kind` to `position` and wakes the listeners in scope.
    pub fn on_new(&self, kind: StreamKind, position: StreamPosition, rooms: &[&RoomId], users: &[&UserId]) {
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if position > current.get(kind) {
                current.set(kind, position);
            }
        }

        let mut woken = 0usize;
        for waiter in self.lock_waiters().values_mut() {
            if !waiter.streams.contains(kind) {
                continue;
            }
            let in_scope = users.iter().any(|user| waiter.user_id == **user)
                || rooms.iter().any(|room| waiter.rooms.contains(*room));
            if !in_scope {
                continue;
            }
            if position > waiter.pending.get(kind) {
                waiter.pending.set(kind, position);
            }
            if waiter.is_satisfied() {
                waiter.notify.notify_one();
                woken += 1;
            }
        }
        debug!("{} advanced to {}, woke {} listeners", kind, position, woken);
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Listener {
    /// Moves the position this listener waits to get past.
    pub fn set_since(&self, since: StreamingToken) {
        if let Some(waiter) = self.lock().get_mut(&self.id) {
            waiter.since = since;
        }
    }

    /// Blocks until a change in scope moves past the `since` token, or the
    /// timeout elapses. Returns whether there is something new.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_satisfied() {
                return true;
            }
            // A wakeup for a change that no longer counts re-blocks here
            if tokio::time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.is_satisfied();
            }
        }
    }

    fn is_satisfied(&self) -> bool {
        self.lock().get(&self.id).is_some_and(Waiter::is_satisfied)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let mut waiters = self.lock();
        waiters.remove(&self.id);
        metrics::gauge!("matrixon_notifier_waiters").set(waiters.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use ruma::{room_id, user_id};

    use super::*;

    #[tokio::test]
    async fn test_wakes_only_listeners_in_scope() {
        let notifier = Notifier::default();
        let alice = notifier.listen(
            user_id!("@alice:example.org"),
            [room_id!("!a:example.org").to_owned()],
            StreamSet::all(),
            StreamingToken::default(),
        );
        let bob = notifier.listen(
            user_id!("@bob:example.org"),
            [room_id!("!b:example.org").to_owned()],
            StreamSet::all(),
            StreamingToken::default(),
        );

        notifier.on_new_event(1, room_id!("!a:example.org"), &[]);

        assert!(alice.wait(Duration::from_millis(10)).await);
        assert!(!bob.wait(Duration::from_millis(10)).await);
        assert_eq!(notifier.current_position().get(StreamKind::Pdu), 1);
    }

    #[tokio::test]
    async fn test_typing_does_not_wake_receipt_listener() {
        let notifier = Notifier::default();
        let room = room_id!("!room:example.org");
        let listener = notifier.listen(
            user_id!("@alice:example.org"),
            [room.to_owned()],
            StreamSet::only(StreamKind::Receipt),
            StreamingToken::default(),
        );

        notifier.on_new_typing(1, room);
        assert!(!listener.wait(Duration::from_millis(20)).await);

        notifier.on_new_receipt(1, room);
        assert!(listener.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_position_at_or_before_since_does_not_count() {
        let notifier = Notifier::default();
        let room = room_id!("!room:example.org");
        let since = StreamingToken::default().with(StreamKind::Pdu, 5);
        let listener = notifier.listen(user_id!("@alice:example.org"), [room.to_owned()], StreamSet::all(), since);

        notifier.on_new_event(5, room, &[]);
        assert!(!listener.wait(Duration::from_millis(10)).await);

        notifier.on_new_event(6, room, &[]);
        assert!(listener.wait(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wakes_a_blocked_waiter() {
        let notifier = Arc::new(Notifier::default());
        let listener = notifier.listen(
            user_id!("@alice:example.org"),
            [],
            StreamSet::all(),
            StreamingToken::default(),
        );

        let waiter = tokio::spawn(async move { listener.wait(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.on_new_invite(3, user_id!("@alice:example.org"));

        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_dropping_listener_deregisters() {
        let notifier = Notifier::default();
        let listener = notifier.listen(
            user_id!("@alice:example.org"),
            [],
            StreamSet::all(),
            StreamingToken::default(),
        );
        assert_eq!(notifier.waiter_count(), 1);
        drop(listener);
        assert_eq!(notifier.waiter_count(), 0);
    }
}
