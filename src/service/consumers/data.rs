// =============================================================================
// Matrixon Streams - Consumer Bus Data
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

use crate::{
    database::abstraction::{ReadView, Transaction},
    Result,
};

#[async_trait]
pub trait Data: Send + Sync {
    /// Appends a message to the topic and returns its offset. The topic
    /// counter stays locked until `txn` finishes, so offsets commit in order.
    async fn append(&self, txn: &mut Transaction, topic: &'static str, payload: &[u8]) -> Result<u64>;

    /// Up to `limit` messages with an offset above `offset`, ascending.
    fn messages_after(
        &self,
        view: &dyn ReadView,
        topic: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>>;

    /// The last offset the consumer acknowledged, 0 if none.
    fn acked_offset(&self, view: &dyn ReadView, consumer: &str) -> Result<u64>;

    fn ack(&self, txn: &mut Transaction, consumer: &str, offset: u64) -> Result<()>;

    /// Deletes the messages up to and including `until`.
    fn prune(&self, txn: &mut Transaction, topic: &str, until: u64) -> Result<usize>;
}
