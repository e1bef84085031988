// =============================================================================
// Matrixon Streams - EDU Services
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
//   Ephemeral data units: typing notifications, read receipts and presence.
//
// =============================================================================

pub mod presence;
pub mod read_receipt;
pub mod typing;

pub trait Data: presence::Data + read_receipt::Data {}

impl<T> Data for T where T: presence::Data + read_receipt::Data {}

pub struct Service {
    pub presence: presence::Service,
    pub read_receipt: read_receipt::Service,
    pub typing: typing::Service,
}
