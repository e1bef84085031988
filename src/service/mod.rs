// =============================================================================
// Matrixon Streams - Service Module
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
//   Central service container. Every concern owns a `Service` backed by the
//   `Data` trait its storage implements; `Services` wires them together
//   over one `KeyValueDatabase` and drives the background tasks.
//
// =============================================================================

use std::{sync::Arc, time::Duration};

use matrixon_core::types::StreamKind;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, instrument};

use crate::{
    database::{
        abstraction::{Snapshot, Transaction},
        KeyValueDatabase,
    },
    Config, Result,
};

pub mod account_data;
pub mod consumers;
pub mod globals;
pub mod pdu;
pub mod rooms;
pub mod sync;
pub mod users;

/// Central service container for the room server core and its sync
/// streams.
///
/// # Service Architecture
/// - `globals`: configuration and the stream position allocator
/// - `rooms`: events, state, topology, memberships and ephemeral data
/// - `users` / `account_data`: per-user stream data
/// - `sync`: the notifier and the long-poll request pool
/// - `consumers`: the in-process bus feeding upstream messages in
pub struct Services {
    pub db: Arc<KeyValueDatabase>,
    pub globals: globals::Service,
    pub rooms: rooms::Service,
    pub users: users::Service,
    pub account_data: account_data::Service,
    pub sync: sync::Service,
    pub consumers: consumers::Service,
}

impl Services {
    /// Builds every service over `db` and loads the persisted stream
    /// positions into the notifier.
    #[instrument(level = "info", skip(db, config), fields(server_name = %config.server_name))]
    pub fn build(db: Arc<KeyValueDatabase>, config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        info!("🚀 Initializing matrixon streams services");

        let rooms = rooms::Service {
            builder: rooms::builder::Service {
                max_prev_events: config.events.max_prev_events,
                max_auth_events: config.events.max_auth_events,
            },
            edus: rooms::edus::Service {
                presence: rooms::edus::presence::Service { db: db.clone() },
                read_receipt: rooms::edus::read_receipt::Service { db: db.clone() },
                typing: rooms::edus::typing::Service::new(config.typing.timeout_ms),
            },
            event_handler: rooms::event_handler::Service,
            metadata: rooms::metadata::Service { db: db.clone() },
            pagination: rooms::pagination::Service,
            pdu_metadata: rooms::pdu_metadata::Service { db: db.clone() },
            purge: rooms::purge::Service,
            short: rooms::short::Service { db: db.clone() },
            state_cache: rooms::state_cache::Service { db: db.clone() },
            state_compressor: rooms::state_compressor::Service {
                db: db.clone(),
                max_blocks_per_snapshot: config.state.max_blocks_per_snapshot,
            },
            timeline: rooms::timeline::Service { db: db.clone() },
            topology: rooms::topology::Service { db: db.clone() },
            user: rooms::user::Service { db: db.clone() },
        };
        debug!("✅ Room services initialized");

        let services = Arc::new(Self {
            globals: globals::Service {
                db: db.clone(),
                config: config.clone(),
            },
            rooms,
            users: users::Service { db: db.clone() },
            account_data: account_data::Service { db: db.clone() },
            sync: sync::Service::new(config.sync.clone()),
            consumers: consumers::Service::new(db.clone(), config.consumers.clone()),
            db,
        });

        services.load()?;
        Ok(services)
    }

    /// Establishes the notifier baseline from the persisted counters, so a
    /// restart resumes where clients left off.
    fn load(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let mut positions = self.globals.positions(&snapshot)?;
        positions.set(StreamKind::Typing, self.rooms.edus.typing.position());
        self.sync.notifier.set_current_position(positions);
        info!("📍 Loaded stream positions {}", positions);
        Ok(())
    }

    pub fn begin(&self) -> Transaction {
        self.db.begin()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.db.snapshot()
    }

    /// Spawns the typing expiry loop and one task per consumer. The tasks
    /// stop once `shutdown` turns true.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(Arc::clone(self).typing_maintenance(shutdown.clone()))];
        for consumer in consumers::all() {
            handles.push(tokio::spawn(consumers::run(
                Arc::clone(self),
                consumer,
                shutdown.clone(),
            )));
        }
        info!("🏃 Started {} background tasks", handles.len());
        handles
    }

    async fn typing_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for (room_id, position) in self.rooms.edus.typing.typings_maintain().await {
                        self.sync.notifier.on_new_typing(position, &room_id);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Typing maintenance stopped");
                        return;
                    }
                }
            }
        }
    }
}
