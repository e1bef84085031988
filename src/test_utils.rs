// =============================================================================
// Matrixon Streams - Test Utils
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::sync::{Arc, Once};

use crate::{database::KeyValueDatabase, Config, Services};

static INIT: Once = Once::new();

/// Installs a test-writer subscriber once per test process.
pub fn init_test_environment() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    });
}

pub fn test_config() -> Config {
    Config {
        server_name: "example.org".to_owned(),
        ..Config::default()
    }
}

/// A fresh volatile database.
pub fn test_database() -> Arc<KeyValueDatabase> {
    init_test_environment();
    KeyValueDatabase::load_or_create(&test_config()).expect("volatile database opens")
}

pub fn test_services() -> Arc<Services> {
    let config = test_config();
    let db = test_database();
    Services::build(db, config).expect("services build")
}
