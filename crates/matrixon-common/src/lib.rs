//! Matrixon Common Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.12.0-alpha
//!
//! Error and result types shared by every crate of the Matrixon streams
//! workspace.

pub mod error;

pub use error::{Error, Result};
