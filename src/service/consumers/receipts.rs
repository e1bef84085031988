// =============================================================================
// Matrixon Streams - Receipts Consumer
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
    service::{rooms::edus::read_receipt::ReceiptRecord, Services},
    Result,
};

pub struct ReceiptsConsumer;

#[async_trait]
impl Consumer for ReceiptsConsumer {
    fn name(&self) -> &'static str {
        "streams_receipts"
    }

    fn topic(&self) -> Topic {
        Topic::Receipts
    }

    async fn on_message(&self, services: &Services, message: &Value) -> Result<bool> {
        let record: ReceiptRecord = parse(message)?;

        let mut txn = services.begin();
        let position = services.globals.advance(&mut txn, StreamKind::Receipt).await?;
        services
            .rooms
            .edus
            .read_receipt
            .readreceipt_update(&mut txn, position, &record)?;
        txn.commit()?;

        services.sync.notifier.on_new_receipt(position, &record.room_id);
        Ok(true)
    }
}
