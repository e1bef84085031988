// =============================================================================
// Matrixon Streams - Sync Service
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
//   The long-poll request pool. A request without a token gets a complete
//   sync of every stream; a request with one gets the per-stream deltas and
//   blocks on the notifier while there are none, until the timeout.
//
// =============================================================================

pub mod notifier;
pub mod response;
pub mod streams;

use std::time::Duration;

use matrixon_core::{
    config::SyncConfig,
    types::{StreamKind, StreamSet, StreamingToken},
};
use ruma::{DeviceId, OwnedRoomId, UserId};
use tracing::{debug, error, instrument};

pub use self::{
    notifier::{Listener, Notifier},
    response::SyncResponse,
    streams::{StreamProvider, SyncContext},
};
use crate::{database::abstraction::Snapshot, service::Services, Result};

pub struct Service {
    pub config: SyncConfig,
    pub notifier: Notifier,
    providers: Vec<Box<dyn StreamProvider>>,
}

impl Service {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            notifier: Notifier::default(),
            providers: streams::providers(),
        }
    }

    /// The newest committed position of every stream.
    pub async fn latest_token(&self, services: &Services) -> Result<StreamingToken> {
        let snapshot = services.snapshot();
        self.token_at(services, &snapshot).await
    }

    /// The position of every stream as seen by `snapshot`.
    async fn token_at(&self, services: &Services, snapshot: &Snapshot) -> Result<StreamingToken> {
        let mut token = StreamingToken::default();
        for provider in &self.providers {
            token.set(provider.kind(), provider.latest_position(services, snapshot).await?);
        }
        Ok(token)
    }

    /// Answers one sync request.
    ///
    /// Storage failures are logged here in full; callers should only show
    /// [`crate::Error::client_message`] to the client.
    #[instrument(skip(self, services, since, timeout), fields(since = ?since.map(|s| s.to_string())))]
    pub async fn sync(
        &self,
        services: &Services,
        user_id: &UserId,
        device_id: &DeviceId,
        since: Option<StreamingToken>,
        timeout: Option<Duration>,
    ) -> Result<SyncResponse> {
        metrics::counter!("matrixon_sync_requests_total").increment(1);
        let result = self.sync_inner(services, user_id, device_id, since, timeout).await;
        if let Err(e) = &result {
            error!("Sync for {} {} failed: {}", user_id, device_id, e);
        }
        result
    }

    async fn sync_inner(
        &self,
        services: &Services,
        user_id: &UserId,
        device_id: &DeviceId,
        since: Option<StreamingToken>,
        timeout: Option<Duration>,
    ) -> Result<SyncResponse> {
        let timeout = timeout
            .unwrap_or(Duration::from_millis(self.config.default_timeout_ms))
            .min(Duration::from_millis(self.config.max_timeout_ms));
        let deadline = tokio::time::Instant::now() + timeout;

        if let Some(since) = &since {
            // The client saw everything up to its token
            let mut txn = services.begin();
            services.users.remove_to_device_events(
                &mut txn,
                user_id,
                device_id,
                since.get(StreamKind::SendToDevice),
            )?;
            txn.commit()?;
        }

        let mut wait_since = since.unwrap_or_default();
        loop {
            let joined_rooms = self.joined_rooms(services, user_id)?;
            // Registered before the token is taken, so nothing slips between
            let listener = self
                .notifier
                .listen(user_id, joined_rooms.iter().cloned(), StreamSet::all(), wait_since);

            // The token comes from the snapshot the response is read from
            let snapshot = services.snapshot();
            let token = self.token_at(services, &snapshot).await?;
            let joined_rooms = services.rooms.state_cache.joined_rooms(&snapshot, user_id)?;
            let ctx = SyncContext {
                services,
                snapshot: &snapshot,
                user_id,
                device_id,
                joined_rooms: &joined_rooms,
                timeline_limit: self.config.timeline_limit,
            };
            let response = self.build_response(&ctx, since, token).await?;

            if since.is_none() || !response.is_empty() {
                return Ok(response);
            }

            drop(snapshot);
            listener.set_since(token);
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() || !listener.wait(remaining).await {
                debug!("Sync for {} timed out at {}", user_id, token);
                return Ok(response);
            }
            wait_since = token;
        }
    }

    /// Runs every provider between `since` and `to`.
    ///
    /// A stream whose `since` position is ahead of `to` was reset (typing
    /// restarts at 0 with the process) and is synced from scratch.
    async fn build_response(
        &self,
        ctx: &SyncContext<'_>,
        since: Option<StreamingToken>,
        to: StreamingToken,
    ) -> Result<SyncResponse> {
        let mut response = SyncResponse::default();
        let mut next_batch = to;

        for provider in &self.providers {
            let kind = provider.kind();
            let latest = to.get(kind);
            let position = match since.map(|since| since.get(kind)) {
                Some(from) if from == latest => latest,
                Some(from) if from < latest => {
                    provider
                        .incremental_sync(ctx, &mut response, from, latest)
                        .await?
                }
                _ => provider.complete_sync(ctx, &mut response, latest).await?,
            };
            next_batch.set(kind, position);
        }

        response.rooms.join.retain(|_, room| !room.is_empty());
        response.next_batch = next_batch.to_string();
        Ok(response)
    }

    fn joined_rooms(&self, services: &Services, user_id: &UserId) -> Result<Vec<OwnedRoomId>> {
        let snapshot = services.snapshot();
        services.rooms.state_cache.joined_rooms(&snapshot, user_id)
    }
}
