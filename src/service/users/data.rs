// =============================================================================
// Matrixon Streams - Users Data
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use matrixon_core::types::StreamPosition;
use ruma::{DeviceId, OwnedUserId, UserId};
use serde_json::Value;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub trait Data: Send + Sync {
    /// Records that the device keys of `user_id` changed at `position`.
    /// Only the latest change of each user is kept.
    fn mark_device_key_update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        user_id: &UserId,
    ) -> Result<()>;

    /// Users whose keys changed with `from < position <= to`.
    fn keys_changed(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, OwnedUserId)>>;

    fn add_to_device_event(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        target_user_id: &UserId,
        target_device_id: &DeviceId,
        event: &Value,
    ) -> Result<()>;

    /// Queued messages for a device with `from < position <= to`.
    fn get_to_device_events(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        device_id: &DeviceId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, Value)>>;

    /// Deletes every queued message up to and including `until`.
    fn remove_to_device_events(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        device_id: &DeviceId,
        until: StreamPosition,
    ) -> Result<usize>;
}
