// =============================================================================
// Matrixon Streams - Globals Service
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
//   Server-wide configuration and the stream position allocator.
//
// =============================================================================

mod data;

use std::sync::Arc;

pub use data::Data;
use matrixon_core::types::{StreamKind, StreamPosition, StreamingToken};
use tracing::debug;

use crate::{
    database::abstraction::{ReadView, Transaction},
    Config, Result,
};

pub struct Service {
    pub db: Arc<dyn Data>,
    pub config: Config,
}

impl Service {
    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    /// Allocates the next position of a stream inside `txn`.
    pub async fn advance(&self, txn: &mut Transaction, kind: StreamKind) -> Result<StreamPosition> {
        let position = self.db.advance_stream(txn, kind.stream_name()).await?;
        debug!("Allocated {} position {}", kind, position);
        Ok(position)
    }

    pub fn position(&self, view: &dyn ReadView, kind: StreamKind) -> Result<StreamPosition> {
        self.db.stream_position(view, kind.stream_name())
    }

    /// Persisted positions of every stream as one token.
    ///
    /// Typing notifications live in memory only and always load as 0.
    pub fn positions(&self, view: &dyn ReadView) -> Result<StreamingToken> {
        let mut token = StreamingToken::default();
        for kind in StreamKind::ALL {
            if kind != StreamKind::Typing {
                token.set(kind, self.position(view, kind)?);
            }
        }
        Ok(token)
    }

    /// Raw counters, for diagnostics.
    pub fn stream_positions(&self, view: &dyn ReadView) -> Result<Vec<(String, u64)>> {
        self.db.stream_positions(view)
    }
}
