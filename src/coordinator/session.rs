// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session operations: join, leave, stat writes, leaderboards.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::{CoordinatorState, SessionFailure, ShardCoordinator};
use crate::cache::{CacheError, CachePayload};
use crate::identity::{EntityId, OwnerHandle};
use crate::init_tracker::InitError;
use crate::leaderboard::{LeaderboardRefresher, LeaderboardSink};
use crate::stats::record::{StatKind, StatisticsRecord};

impl<V: CachePayload> ShardCoordinator<V> {
    /// Initialize a connecting entity: load its payload and statistics under
    /// the init deadline.
    ///
    /// On failure the [`SessionTerminator`](super::SessionTerminator) is
    /// called exactly once, by whichever of the deadline or the failed load
    /// comes first. Work that finishes after the deadline is rolled back.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn join_entity(&self, owner: OwnerHandle) -> Result<(), SessionFailure> {
        let current = self.state();
        if current != CoordinatorState::Running {
            return Err(SessionFailure::NotRunning(current));
        }

        let entity = owner.entity();
        let deadline = self.config.init_timeout();
        let grace = self.config.init_cleanup_grace();
        let timed_out = SessionFailure::InitTimeout { owner, after: deadline };

        let init = self.tracker.create(entity);
        let terminator = Arc::clone(&self.terminator);
        let on_timeout = timed_out.clone();
        self.tracker.schedule_timeout(&init, deadline, move |_| {
            terminator.terminate(owner, &on_timeout);
        });

        let loaded = match self.cache.load(owner).await {
            Ok(()) => self.stats.load(entity).await,
            Err(e) => {
                let reason = e.to_string();
                let first = self.tracker.complete(&init, false, Some(InitError::Failed(reason.clone())));
                self.tracker.schedule_cleanup(entity, grace);
                if !first {
                    return Err(timed_out);
                }
                error!(error = %reason, "Entity data could not be loaded");
                let failure = SessionFailure::CacheLoad { owner, reason };
                self.terminator.terminate(owner, &failure);
                return Err(failure);
            }
        };

        if !self.tracker.complete(&init, true, None) {
            // the deadline already ended this session
            self.cache.abandon(owner);
            self.tracker.schedule_cleanup(entity, grace);
            warn!("Discarding initialization that finished after its deadline");
            return Err(timed_out);
        }

        self.session.join(entity, loaded);
        self.tracker.schedule_cleanup(entity, grace);
        info!("Entity joined");
        Ok(())
    }

    /// Save and drop everything held for a disconnecting entity.
    ///
    /// Returns `false` if anything is still unsaved. The session ends either
    /// way; unsaved statistics and payload are kept aside and retried by the
    /// next autosave or the shutdown flush.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn leave_entity(&self, owner: OwnerHandle) -> bool {
        let entity = owner.entity();

        // save while still in session so a concurrent shutdown flush sees it
        if let Some(pending) = self.session.pending(entity) {
            if self.stats.save(entity, &pending.record).await {
                self.session.mark_saved(entity, pending.version);
            }
        }
        let stats_saved = self.session.leave(entity).is_none();
        let payload_saved = self.cache.release(owner).await;

        if stats_saved && payload_saved {
            info!("Entity left");
        } else {
            warn!(stats_saved, payload_saved, "Entity left with unsaved data, retrying on next save");
        }
        stats_saved && payload_saved
    }

    /// Local stat write; saved by autosave, leave, or shutdown.
    pub fn record_stat(&self, entity: EntityId, stat: StatKind, value: u64) -> bool {
        self.session.record_local(entity, stat, value)
    }

    pub fn stats_of(&self, entity: EntityId) -> Option<StatisticsRecord> {
        self.session.get(entity)
    }

    pub fn payload(&self, owner: OwnerHandle) -> Result<V, CacheError> {
        self.cache.get(owner)
    }

    pub fn modify_payload<F>(&self, owner: OwnerHandle, f: F) -> Result<V, CacheError>
    where
        F: FnOnce(&mut V),
    {
        self.cache.modify(owner, f)
    }

    /// Read-only payload of an entity that may be on another shard.
    pub async fn lookup(&self, entity: EntityId) -> Option<V> {
        self.cache.load_temporary(entity).await
    }

    /// Start refreshing the leaderboard for `stat` under the adaptive
    /// scheduler. `None` if no ordered store was configured for it.
    pub fn register_leaderboard(
        &self,
        stat: StatKind,
        sink: Option<Arc<dyn LeaderboardSink>>,
    ) -> Option<Arc<LeaderboardRefresher>> {
        let Some(board) = self.stats.leaderboard(stat) else {
            warn!(stat = %stat, "No leaderboard store configured");
            return None;
        };
        let refresher = Arc::new(LeaderboardRefresher::new(
            format!("{}Leaderboard", stat),
            Arc::clone(&self.client),
            Arc::clone(board),
            self.config.leaderboard_page_size,
            sink,
        ));
        self.scheduler
            .register(refresher.clone(), self.config.leaderboard_interval());
        Some(refresher)
    }

    /// External readiness signal: refresh `resource` now.
    pub async fn handle_ready_event(&self, resource: &str) -> bool {
        self.scheduler.handle_ready_event(resource).await
    }
}
