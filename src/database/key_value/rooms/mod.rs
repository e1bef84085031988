// =============================================================================
// Matrixon Streams - Room Storage
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

mod edus;
mod metadata;
mod pdu_metadata;
mod short;
mod state_cache;
mod state_compressor;
mod timeline;
mod topology;
mod user;
