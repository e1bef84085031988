// =============================================================================
// Matrixon Streams - Clap Module
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
//   Command line interface of the streams binary.
//
// =============================================================================

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Returns the current version of the crate with extra info if supplied
///
/// Set the environment variable `MATRIXON_VERSION_EXTRA` at build time to any
/// UTF-8 string to include it in parenthesis after the SemVer version. A
/// common value are git commit hashes.
pub fn version() -> String {
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    match option_env!("MATRIXON_VERSION_EXTRA") {
        Some(x) => format!("{} ({})", cargo_pkg_version, x),
        None => cargo_pkg_version.to_owned(),
    }
}

/// Matrixon Streams - event-graph storage and stream-ordered sync
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(about, version = version(), name = "matrixon-streams")]
pub struct Args {
    /// Path to configuration file
    #[clap(short, long, global = true, env = "MATRIXON_CONFIG")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the consumers until interrupted
    Start,

    /// Feed upstream messages through the consumers and exit
    ///
    /// Every line of the file is a JSON object `{"topic": ..., "message": ...}`.
    Ingest {
        /// JSON-lines file of upstream messages
        file: PathBuf,
    },

    /// Run one sync request and print the response
    Sync {
        /// User ID (e.g., @alice:example.org)
        #[clap(short, long)]
        user: String,

        /// Device ID
        #[clap(short, long)]
        device: String,

        /// Token from a previous response
        #[clap(short, long)]
        since: Option<String>,

        /// How long to wait for changes
        #[clap(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Print the position of every stream
    Positions,
}

/// Parse command line arguments into structured data
pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_format() {
        let version_str = version();
        assert!(version_str.contains(env!("CARGO_PKG_VERSION")));
        assert!(version_str.chars().next().unwrap().is_ascii_digit());
    }

    #[test]
    fn test_sync_arguments() {
        let args = Args::try_parse_from([
            "matrixon-streams",
            "--config",
            "streams.toml",
            "sync",
            "--user",
            "@alice:example.org",
            "--device",
            "PHONE",
            "--since",
            "s5_1",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("streams.toml")));
        assert_eq!(
            args.command,
            Commands::Sync {
                user: "@alice:example.org".to_owned(),
                device: "PHONE".to_owned(),
                since: Some("s5_1".to_owned()),
                timeout_ms: None,
            }
        );
    }

    #[test]
    fn test_ingest_requires_a_file() {
        assert!(Args::try_parse_from(["matrixon-streams", "ingest"]).is_err());
        let args = Args::try_parse_from(["matrixon-streams", "ingest", "events.jsonl"]).unwrap();
        assert_eq!(
            args.command,
            Commands::Ingest {
                file: PathBuf::from("events.jsonl")
            }
        );
    }
}
