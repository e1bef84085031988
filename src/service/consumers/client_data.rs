// =============================================================================
// Matrixon Streams - Client Data Consumer
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
    service::{account_data::AccountDataRecord, Services},
    Result,
};

/// Account data changes, global or per room.
pub struct ClientDataConsumer;

#[async_trait]
impl Consumer for ClientDataConsumer {
    fn name(&self) -> &'static str {
        "streams_client_data"
    }

    fn topic(&self) -> Topic {
        Topic::ClientData
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let record: AccountDataRecord = parse(message)?;

        let mut txn = services.begin();
        let position = services.globals.advance(&mut txn, StreamKind::AccountData).await?;
        services.account_data.update(&mut txn, position, &record)?;
        txn.commit()?;

        services.sync.notifier.on_new_account_data(position, &record.user_id);
        Ok(true)
    }
}
