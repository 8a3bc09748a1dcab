// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Leaderboard refresh.
//!
//! Reads the top page of an ordered store (kept up to date by
//! [`crate::StatisticsStore`]'s mirrors) and hands ranked rows to the display.
//! Runs under the [`crate::AdaptiveScheduler`]; the last good snapshot is kept
//! so a failed refresh leaves the board as it was.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::identity::EntityId;
use crate::resilience::client::ResilientStoreClient;
use crate::scheduler::{RefreshError, RefreshTask};
use crate::storage::traits::{RemoteStore, SortedQuery};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    /// 1-based
    pub rank: usize,
    pub entity: EntityId,
    pub value: i64,
}

/// Receives every refreshed board.
pub trait LeaderboardSink: Send + Sync {
    fn publish(&self, board: &str, rows: &[LeaderboardRow]);
}

pub struct LeaderboardRefresher {
    name: String,
    client: Arc<ResilientStoreClient>,
    store: Arc<dyn RemoteStore>,
    query: SortedQuery,
    sink: Option<Arc<dyn LeaderboardSink>>,
    snapshot: RwLock<Vec<LeaderboardRow>>,
}

impl LeaderboardRefresher {
    pub fn new(
        name: impl Into<String>,
        client: Arc<ResilientStoreClient>,
        store: Arc<dyn RemoteStore>,
        page_size: usize,
        sink: Option<Arc<dyn LeaderboardSink>>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            store,
            query: SortedQuery::top(page_size),
            sink,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// Rows from the last successful refresh.
    pub fn snapshot(&self) -> Vec<LeaderboardRow> {
        self.snapshot.read().clone()
    }
}

#[async_trait]
impl RefreshTask for LeaderboardRefresher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) -> Result<(), RefreshError> {
        let entries = self
            .client
            .sorted_read(self.store.as_ref(), &self.query)
            .await
            .into_result()?;

        let rows: Vec<LeaderboardRow> = entries
            .into_iter()
            .filter_map(|entry| match EntityId::from_key(&entry.key, "") {
                Some(entity) => Some((entity, entry.value)),
                None => {
                    warn!(board = %self.name, key = %entry.key, "Skipping leaderboard entry with malformed key");
                    None
                }
            })
            .enumerate()
            .map(|(i, (entity, value))| LeaderboardRow { rank: i + 1, entity, value })
            .collect();

        debug!(board = %self.name, rows = rows.len(), "Leaderboard refreshed");
        if let Some(sink) = &self.sink {
            sink.publish(&self.name, &rows);
        }
        *self.snapshot.write() = rows;
        Ok(())
    }
}
