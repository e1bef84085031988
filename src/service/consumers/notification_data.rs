// =============================================================================
// Matrixon Streams - Notification Data Consumer
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
use serde_json::Value;

use super::{parse, Consumer, Topic};
use crate::{
    service::{rooms::user::NotificationRecord, Services},
    Result,
};

/// Unread counts computed by the push rules evaluator upstream.
pub struct NotificationDataConsumer;

#[async_trait]
impl Consumer for NotificationDataConsumer {
    fn name(&self) -> &'static str {
        "streams_notification_data"
    }

    fn topic(&self) -> Topic {
        Topic::NotificationData
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let record: NotificationRecord = parse(message)?;

        let mut txn = services.begin();
        let position = services
            .globals
            .advance(&mut txn, StreamKind::NotificationData)
            .await?;
        services
            .rooms
            .user
            .update_notification_counts(&mut txn, position, &record)?;
        txn.commit()?;

        services
            .sync
            .notifier
            .on_new_notification_data(position, &record.user_id);
        Ok(true)
    }
}
