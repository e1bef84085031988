// =============================================================================
// Matrixon Streams - Library Root
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
//   Event-graph storage and stream-ordered fan-out for a Matrix NextServer.
//   Accepted events are persisted with their state and topology, every
//   change is published on a named stream at a gap-free position, and sync
//   requests are answered as per-stream deltas between two tokens.
//
// =============================================================================

pub mod database;
pub mod service;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use matrixon_common::{Error, Result};
pub use matrixon_core::{types, Config};
pub use ruma;

pub use database::KeyValueDatabase;
pub use service::{pdu::PduEvent, Services};
