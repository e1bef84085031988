// =============================================================================
// Matrixon Streams - Globals Data
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
    /// Increments the named stream counter inside `txn` and returns the new
    /// position.
    ///
    /// The counter row stays locked until `txn` finishes, so concurrent
    /// writers of the same stream commit in position order and a rolled
    /// back transaction never leaves a position behind that someone else
    /// already observed.
    async fn advance_stream(&self, txn: &mut Transaction, stream: &'static str) -> Result<u64>;

    /// The last committed position of a stream, 0 if it never advanced.
    fn stream_position(&self, view: &dyn ReadView, stream: &str) -> Result<u64>;

    /// Every stream counter that was ever advanced.
    fn stream_positions(&self, view: &dyn ReadView) -> Result<Vec<(String, u64)>>;
}
