// =============================================================================
// Matrixon Streams - Globals Storage
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
    database::{
        abstraction::{ReadView, Transaction},
        trees, KeyValueDatabase,
    },
    service, utils, Result,
};

#[async_trait]
impl service::globals::Data for KeyValueDatabase {
    async fn advance_stream(&self, txn: &mut Transaction, stream: &'static str) -> Result<u64> {
        txn.lock_row(trees::STREAMID, stream.as_bytes()).await;
        let current = service::globals::Data::stream_position(self, &*txn, stream)?;
        let next = current + 1;
        txn.insert(trees::STREAMID, stream.as_bytes(), &next.to_be_bytes());
        Ok(next)
    }

    fn stream_position(&self, view: &dyn ReadView, stream: &str) -> Result<u64> {
        view.get(trees::STREAMID, stream.as_bytes())?
            .map(|bytes| utils::u64_from_bytes(&bytes))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    fn stream_positions(&self, view: &dyn ReadView) -> Result<Vec<(String, u64)>> {
        view.scan_prefix(trees::STREAMID, b"", false)?
            .into_iter()
            .map(|(name, position)| {
                Ok((utils::string_from_bytes(&name)?, utils::u64_from_bytes(&position)?))
            })
            .collect()
    }
}
