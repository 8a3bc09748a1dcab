// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Merge-on-write statistics store.
//!
//! # Save path
//!
//! ```text
//! save(entity, delta)
//!       │
//!       ▼
//! client.update(Stats_{id}, max-merge)   ── fails ──► false
//!       │ merged record
//!       ├─► leaderboard mirrors: update(id, max) per stat in delta (best effort)
//!       └─► bus: publish {entityId, stat, merged value} per stat in delta (best effort)
//!       ▼
//!     true
//! ```
//!
//! Reads are best-effort display data: any failure yields a zeroed record.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::record::{max_transform, merge_transform, StatKind, StatisticsRecord};
use crate::identity::EntityId;
use crate::metrics;
use crate::resilience::client::ResilientStoreClient;
use crate::storage::traits::RemoteStore;
use crate::sync::bus::SyncBus;
use crate::sync::message::CrossServerMessage;

pub struct StatisticsStore {
    client: Arc<ResilientStoreClient>,
    store: Arc<dyn RemoteStore>,
    key_prefix: String,
    leaderboards: HashMap<StatKind, Arc<dyn RemoteStore>>,
    bus: Option<(Arc<SyncBus>, String)>,
}

impl StatisticsStore {
    pub fn new(client: Arc<ResilientStoreClient>, store: Arc<dyn RemoteStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            store,
            key_prefix: key_prefix.into(),
            leaderboards: HashMap::new(),
            bus: None,
        }
    }

    /// Mirror `stat` into an ordered store keyed by entity id.
    pub fn with_leaderboard(mut self, stat: StatKind, store: Arc<dyn RemoteStore>) -> Self {
        self.leaderboards.insert(stat, store);
        self
    }

    /// Publish merged values on `topic` after each successful save.
    pub fn with_bus(mut self, bus: Arc<SyncBus>, topic: impl Into<String>) -> Self {
        self.bus = Some((bus, topic.into()));
        self
    }

    pub fn leaderboard(&self, stat: StatKind) -> Option<&Arc<dyn RemoteStore>> {
        self.leaderboards.get(&stat)
    }

    pub fn key(&self, entity: EntityId) -> String {
        entity.key(&self.key_prefix)
    }

    /// Max-merge `delta` into the stored record.
    ///
    /// Returns whether the authoritative write succeeded; mirroring and
    /// publishing failures are logged but do not fail the save.
    pub async fn save(&self, entity: EntityId, delta: &StatisticsRecord) -> bool {
        if delta.is_empty() {
            return true;
        }

        let key = self.key(entity);
        let result = self
            .client
            .update(self.store.as_ref(), &key, merge_transform(delta.clone()))
            .await;

        let merged = match result.into_result() {
            Ok(stored) => stored
                .map(|value| StatisticsRecord::sanitize(&value))
                .unwrap_or_else(|| delta.clone()),
            Err(e) => {
                warn!(entity = %entity, error = %e, "Statistics save failed");
                metrics::record_stats_save(false);
                return false;
            }
        };
        metrics::record_stats_save(true);
        debug!(entity = %entity, "Statistics saved");

        self.mirror(entity, delta).await;
        self.announce(entity, delta, &merged).await;
        true
    }

    async fn mirror(&self, entity: EntityId, delta: &StatisticsRecord) {
        for (stat, value) in delta.iter() {
            let Some(board) = self.leaderboards.get(&stat) else {
                continue;
            };
            let result = self
                .client
                .update(board.as_ref(), &entity.key(""), max_transform(value))
                .await;
            if !result.success {
                warn!(entity = %entity, stat = %stat, error = ?result.error, "Leaderboard mirror failed");
            }
        }
    }

    async fn announce(&self, entity: EntityId, delta: &StatisticsRecord, merged: &StatisticsRecord) {
        let Some((bus, topic)) = &self.bus else {
            return;
        };
        for (stat, _) in delta.iter() {
            let message = CrossServerMessage::new(entity, stat, merged.get(stat));
            if !bus.publish_message(topic, &message).await {
                warn!(entity = %entity, stat = %stat, "Stat change not propagated to other shards");
            }
        }
    }

    /// Stored record, with every stat present. Zeroed on any failure.
    pub async fn load(&self, entity: EntityId) -> StatisticsRecord {
        let key = self.key(entity);
        match self.client.get(self.store.as_ref(), &key).await.into_result() {
            Ok(Some(value)) => StatisticsRecord::zeroed().merged(&StatisticsRecord::sanitize(&value)),
            Ok(None) => StatisticsRecord::zeroed(),
            Err(e) => {
                warn!(entity = %entity, error = %e, "Statistics load failed, using zeroed defaults");
                StatisticsRecord::zeroed()
            }
        }
    }
}
