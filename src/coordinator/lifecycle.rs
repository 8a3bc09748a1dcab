// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator lifecycle: start and shutdown.

use tracing::{info, warn};

use super::flush::autosave;
use super::{CoordinatorError, CoordinatorState, ShardCoordinator};
use crate::cache::CachePayload;
use crate::worker::BackgroundWorker;

impl<V: CachePayload> ShardCoordinator<V> {
    /// Start background work and begin accepting sessions.
    ///
    /// A failed subscription leaves the shard running in degraded mode (see
    /// [`is_sync_degraded`](Self::is_sync_degraded)); it is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        let current = self.state();
        if current != CoordinatorState::Created {
            return Err(CoordinatorError::InvalidState { action: "start", state: current });
        }
        self.set_state(CoordinatorState::Starting);

        let topic = self.config.stats_topic.clone();
        let live = self
            .bus
            .subscribe(&topic, self.stats_handler.handler(), self.config.sync_max_retries)
            .await;
        if !live {
            warn!(topic = %topic, "Starting without cross-shard sync");
        }

        self.cache
            .start_sweeper(self.config.cleanup_interval(), self.config.cache_max_age());
        self.start_autosave();

        self.set_state(CoordinatorState::Running);
        info!(live_sync = live, "Shard coordinator running");
        Ok(())
    }

    fn start_autosave(&self) {
        let Some(interval) = self.config.autosave_interval() else {
            return;
        };
        let session = self.session.clone();
        let stats = self.stats.clone();
        let cache = self.cache.clone();
        let worker = BackgroundWorker::periodic("autosave", interval, move || {
            let session = session.clone();
            let stats = stats.clone();
            let cache = cache.clone();
            async move {
                autosave(&session, &stats, &cache).await;
            }
        });
        *self.autosave.lock() = Some(worker);
    }

    /// Drain and stop.
    ///
    /// Order matters: admission polling stops first (the gate then admits
    /// without waiting so the flush below is not starved), then timers are
    /// cancelled, then every session's statistics and payload are saved,
    /// and only then is the bus disconnected and the cache cleared.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        match self.state() {
            CoordinatorState::ShuttingDown | CoordinatorState::Stopped => return,
            _ => {}
        }
        info!("Shutting down shard coordinator...");
        self.set_state(CoordinatorState::ShuttingDown);

        self.client.gate().stop();

        self.scheduler.shutdown();
        self.tracker.cancel_all();
        let autosave = self.autosave.lock().take();
        if let Some(worker) = autosave {
            worker.stop().await;
        }
        self.cache.stop_sweeper().await;

        let (saved, failed) = self.save_all_stats().await;
        let payloads = self.cache.flush_all().await;
        if failed > 0 {
            warn!(saved, failed, "Some statistics were not saved during shutdown");
        }

        self.bus.disconnect().await;
        self.cache.clear();

        self.set_state(CoordinatorState::Stopped);
        info!(stats_saved = saved, payloads_saved = payloads, "Shard coordinator stopped");
    }
}
