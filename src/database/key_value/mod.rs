// =============================================================================
// Matrixon Streams - Key Value Tables
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

mod account_data;
mod consumers;
mod globals;
mod rooms;
mod users;
