//! Matrixon Core Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.12.0-alpha
//!
//! Fundamental types shared by the storage engine and the sync streams:
//! numeric identifiers, stream and topology tokens, configuration and a
//! handful of byte/hash helpers.
//!
//! # Examples
//! ```rust
//! use matrixon_core::{types::StreamingToken, Config};
//!
//! let config = Config::default();
//! assert!(config.validate().is_ok());
//!
//! let token: StreamingToken = "s5_1".parse().unwrap();
//! assert_eq!(token.to_string(), "s5_1_0_0_0_0_0_0_0_0");
//! ```

pub mod config;
pub mod types;
pub mod utils;

pub use config::Config;
pub use matrixon_common::{Error, Result};
