// =============================================================================
// Matrixon Streams - Stream Providers
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
//   One provider per logical stream. A provider fills its part of a sync
//   response either from scratch (complete sync) or as the delta between two
//   positions of its stream (incremental sync), always against one
//   consistent snapshot.
//
// =============================================================================

mod account_data;
mod device_list;
mod invite;
mod notification_data;
mod pdu;
mod presence;
mod receipt;
mod relations;
mod send_to_device;
mod typing;

use async_trait::async_trait;
use matrixon_core::types::{StreamKind, StreamPosition};
use ruma::{DeviceId, OwnedRoomId, RoomId, UserId};

use super::SyncResponse;
use crate::{database::abstraction::Snapshot, service::Services, Result};

/// Everything a provider needs to answer one request.
pub struct SyncContext<'a> {
    pub services: &'a Services,
    pub snapshot: &'a Snapshot,
    pub user_id: &'a UserId,
    pub device_id: &'a DeviceId,
    /// Rooms the user is joined to in `snapshot`.
    pub joined_rooms: &'a [OwnedRoomId],
    pub timeline_limit: usize,
}

impl SyncContext<'_> {
    pub fn is_joined(&self, room_id: &RoomId) -> bool {
        self.joined_rooms.iter().any(|joined| joined.as_str() == room_id.as_str())
    }
}

#[async_trait]
pub trait StreamProvider: Send + Sync {
    fn kind(&self) -> StreamKind;

    /// The newest position a request reading `snapshot` may sync up to.
    ///
    /// Taken from the counters committed in the snapshot itself, so every
    /// row at or below it is visible to the providers.
    async fn latest_position(&self, services: &Services, snapshot: &Snapshot) -> Result<StreamPosition> {
        services.globals.position(snapshot, self.kind())
    }

    /// Fills the full current view and returns the position it reflects.
    async fn complete_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        to: StreamPosition,
    ) -> Result<StreamPosition>;

    /// Fills the changes in `(from, to]`. Returns `to` even when nothing
    /// changed.
    async fn incremental_sync(
        &self,
        ctx: &SyncContext<'_>,
        response: &mut SyncResponse,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<StreamPosition>;
}

/// One provider per [`StreamKind`], in token order.
pub fn providers() -> Vec<Box<dyn StreamProvider>> {
    vec![
        Box::new(pdu::PduStreamProvider),
        Box::new(typing::TypingStreamProvider),
        Box::new(receipt::ReceiptStreamProvider),
        Box::new(invite::InviteStreamProvider),
        Box::new(send_to_device::SendToDeviceStreamProvider),
        Box::new(account_data::AccountDataStreamProvider),
        Box::new(device_list::DeviceListStreamProvider),
        Box::new(notification_data::NotificationDataStreamProvider),
        Box::new(presence::PresenceStreamProvider),
        Box::new(relations::RelationsStreamProvider),
    ]
}

#[cfg(test)]
mod tests {
    use matrixon_core::types::StreamSet;

    use super::*;

    #[test]
    fn test_every_stream_has_one_provider() {
        let kinds: Vec<StreamKind> = providers().iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, StreamKind::ALL.to_vec());
        assert_eq!(kinds.into_iter().collect::<StreamSet>(), StreamSet::all());
    }
}
