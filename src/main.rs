// =============================================================================
// Matrixon Streams - Main Entry Point
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
//   Loads the configuration, opens the database and runs one of the
//   subcommands: the long-running consumers, a one-shot ingest of upstream
//   messages, a single sync request, or a dump of the stream positions.
//
// =============================================================================

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    value::Uncased,
    Figment,
};
use matrixon_streams::{
    service::consumers::{self, Topic},
    types::{StreamKind, StreamingToken},
    Config, KeyValueDatabase, Services,
};
use ruma::{OwnedDeviceId, UserId};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

mod clap;

// Environment variables are flat; these prefixes select the nested table,
// so MATRIXON_SYNC_TIMELINE_LIMIT sets sync.timeline_limit.
static SUB_TABLES: [&str; 5] = ["sync", "events", "state", "consumers", "typing"];

/// One line of an ingest file.
#[derive(Deserialize)]
struct UpstreamMessage {
    topic: String,
    message: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = clap::parse();
    let config = load_config(args.config.as_deref())?;
    init_tracing(&config);

    info!("🚀 Starting matrixon streams {}", clap::version());
    let db = KeyValueDatabase::load_or_create(&config).context("opening the database")?;
    let services = Services::build(db, config)?;

    let result = match args.command {
        clap::Commands::Start => start(services.clone()).await,
        clap::Commands::Ingest { file } => ingest(&services, &file).await,
        clap::Commands::Sync {
            user,
            device,
            since,
            timeout_ms,
        } => sync(&services, &user, device, since.as_deref(), timeout_ms).await,
        clap::Commands::Positions => positions(&services).await,
    };

    services.db.flush()?;
    result
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("MATRIXON_").global().map(|k| {
        let mut key: Uncased = k.into();

        for table in SUB_TABLES {
            if k.starts_with(&(table.to_owned() + "_")) {
                key = Uncased::from(table.to_owned() + "." + k[table.len() + 1..k.len()].as_str());
                break;
            }
        }

        key
    }));

    let config: Config = figment
        .extract()
        .context("It looks like your config is invalid")?;
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &Config) {
    let registry = tracing_subscriber::Registry::default();
    let fmt_layer = tracing_subscriber::fmt::Layer::new();
    let filter_layer = match EnvFilter::try_new(&config.log) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("It looks like your config is invalid. The following error occurred while parsing it: {e}");
            EnvFilter::new("warn")
        }
    };

    let subscriber = registry.with(filter_layer).with(fmt_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install the tracing subscriber: {e}");
    }
}

/// Runs every consumer until ctrl-c.
async fn start(services: Arc<Services>) -> anyhow::Result<()> {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handles = services.start(shutdown_rx);

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("🛑 Shutting down");
    let _ = shutdown.send(true);

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("Background task failed: {}", e);
        }
    }
    debug!("Database usage at shutdown:\n{}", services.db.memory_usage()?);
    Ok(())
}

async fn ingest(services: &Services, file: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let mut published = 0;
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let upstream: UpstreamMessage = match serde_json::from_str(line) {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("Skipping line {}: {}", index + 1, e);
                continue;
            }
        };
        let topic: Topic = upstream.topic.parse()?;
        services.consumers.publish(services, topic, &upstream.message).await?;
        published += 1;
    }

    let mut processed = 0;
    for consumer in consumers::all() {
        processed += services
            .consumers
            .process_pending(services, consumer.as_ref())
            .await?;
    }

    info!("📥 Published {} messages, processed {}", published, processed);
    println!("{}", services.sync.latest_token(services).await?);
    Ok(())
}

async fn sync(
    services: &Services,
    user: &str,
    device: String,
    since: Option<&str>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let user_id = UserId::parse(user).with_context(|| format!("invalid user ID {user:?}"))?;
    let device_id = OwnedDeviceId::from(device);
    let since = since.map(str::parse::<StreamingToken>).transpose()?;

    let response = services
        .sync
        .sync(
            services,
            &user_id,
            &device_id,
            since,
            timeout_ms.map(Duration::from_millis),
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn positions(services: &Services) -> anyhow::Result<()> {
    let token = services.sync.latest_token(services).await?;
    for kind in StreamKind::ALL {
        println!("{:<20} {}", kind.stream_name(), token.get(kind));
    }
    println!("{token}");
    Ok(())
}
