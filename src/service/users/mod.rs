// =============================================================================
// Matrixon Streams - Users Service
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
//   Per-user device data the sync streams carry: device list changes and
//   the send-to-device inbox.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::Data;
use matrixon_core::types::StreamPosition;
use ruma::{DeviceId, OwnedUserId, UserId};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
}

impl Service {
    pub fn mark_device_key_update(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        user_id: &UserId,
    ) -> Result<()> {
        self.db.mark_device_key_update(txn, position, user_id)
    }

    pub fn keys_changed(
        &self,
        view: &dyn ReadView,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, OwnedUserId)>> {
        self.db.keys_changed(view, from, to)
    }

    pub fn add_to_device_event(
        &self,
        txn: &mut Transaction,
        position: StreamPosition,
        sender: &UserId,
        target_user_id: &UserId,
        target_device_id: &DeviceId,
        event_type: &str,
        content: Value,
    ) -> Result<()> {
        let event = json!({
            "type": event_type,
            "sender": sender,
            "content": content,
        });
        self.db
            .add_to_device_event(txn, position, target_user_id, target_device_id, &event)
    }

    pub fn get_to_device_events(
        &self,
        view: &dyn ReadView,
        user_id: &UserId,
        device_id: &DeviceId,
        from: StreamPosition,
        to: StreamPosition,
    ) -> Result<Vec<(StreamPosition, Value)>> {
        self.db.get_to_device_events(view, user_id, device_id, from, to)
    }

    /// Called once the device has synced past `until`.
    pub fn remove_to_device_events(
        &self,
        txn: &mut Transaction,
        user_id: &UserId,
        device_id: &DeviceId,
        until: StreamPosition,
    ) -> Result<()> {
        let removed = self.db.remove_to_device_events(txn, user_id, device_id, until)?;
        if removed > 0 {
            debug!("Deleted {} to-device messages for {} {}", removed, user_id, device_id);
        }
        Ok(())
    }
}
