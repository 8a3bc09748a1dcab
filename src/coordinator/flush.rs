// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statistics write-back: periodic autosave and the shutdown flush.
//!
//! Both also drain what departed entities left unsaved.

use tracing::{debug, warn};

use super::ShardCoordinator;
use crate::cache::{CachePayload, EntityCache};
use crate::stats::store::StatisticsStore;
use crate::stats::view::{DirtyRecord, SessionStats};

async fn save_records(session: &SessionStats, stats: &StatisticsStore, records: Vec<DirtyRecord>) -> (usize, usize) {
    let mut saved = 0;
    let mut failed = 0;
    for pending in records {
        if stats.save(pending.entity, &pending.record).await {
            session.mark_saved(pending.entity, pending.version);
            saved += 1;
        } else {
            // stays dirty; the next autosave or the shutdown flush retries it
            failed += 1;
        }
    }
    (saved, failed)
}

/// Save entities with unsaved local writes. Returns (saved, failed).
async fn save_dirty(session: &SessionStats, stats: &StatisticsStore) -> (usize, usize) {
    let dirty = session.dirty();
    if dirty.is_empty() {
        return (0, 0);
    }
    let (saved, failed) = save_records(session, stats, dirty).await;
    if failed > 0 {
        warn!(saved, failed, "Autosave left some statistics unsaved");
    } else {
        debug!(saved, "Autosave complete");
    }
    (saved, failed)
}

/// Autosave tick: dirty statistics, then payloads of departed owners.
pub(super) async fn autosave<V: CachePayload>(
    session: &SessionStats,
    stats: &StatisticsStore,
    cache: &EntityCache<V>,
) -> (usize, usize) {
    let result = save_dirty(session, stats).await;
    let (released, departed) = cache.retry_departed().await;
    if released > 0 || departed > 0 {
        debug!(released, departed, "Retried payloads of departed owners");
    }
    result
}

impl<V: CachePayload> ShardCoordinator<V> {
    /// Save dirty session statistics now, including those parked by a failed
    /// leave, and retry departed payloads. Returns (saved, failed) statistics.
    pub async fn autosave_now(&self) -> (usize, usize) {
        autosave(&self.session, &self.stats, &self.cache).await
    }

    /// Save every session's statistics, dirty or not. Returns (saved, failed).
    pub async fn save_all_stats(&self) -> (usize, usize) {
        save_records(&self.session, &self.stats, self.session.snapshot()).await
    }
}
