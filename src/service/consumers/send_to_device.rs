// =============================================================================
// Matrixon Streams - Send-To-Device Consumer
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
use matrixon_core::types::StreamKind;
use ruma::{OwnedDeviceId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse, Consumer, Topic};
use crate::{service::Services, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToDeviceMessage {
    pub sender: OwnedUserId,
    pub user_id: OwnedUserId,
    pub device_id: OwnedDeviceId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Value,
}

pub struct SendToDeviceConsumer;

#[async_trait]
impl Consumer for SendToDeviceConsumer {
    fn name(&self) -> &'static str {
        "streams_send_to_device"
    }

    fn topic(&self) -> Topic {
        Topic::SendToDevice
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let message: ToDeviceMessage = parse(message)?;

        let mut txn = services.begin();
        let position = services.globals.advance(&mut txn, StreamKind::SendToDevice).await?;
        services.users.add_to_device_event(
            &mut txn,
            position,
            &message.sender,
            &message.user_id,
            &message.device_id,
            &message.event_type,
            message.content,
        )?;
        txn.commit()?;

        services.sync.notifier.on_new_send_to_device(position, &message.user_id);
        Ok(true)
    }
}
