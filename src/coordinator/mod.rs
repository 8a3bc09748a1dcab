// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shard coordinator.
//!
//! The [`ShardCoordinator`] ties the pieces together for one server shard:
//! - resilient store client with admission control
//! - entity cache for connected (and briefly looked-up) entities
//! - merge-on-write statistics with leaderboard mirrors
//! - sync bus carrying statistic changes between shards
//! - init tracker guarding each join with a deadline
//! - adaptive scheduler refreshing leaderboards
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use shard_sync::{
//!     CoordinatorBackends, CoordinatorState, InMemoryStore, LocalBroker, OwnerHandle,
//!     SessionFailure, SessionTerminator, ShardCoordinator, ShardSyncConfig,
//! };
//! use std::sync::Arc;
//!
//! struct Kick;
//! impl SessionTerminator for Kick {
//!     fn terminate(&self, owner: OwnerHandle, failure: &SessionFailure) {
//!         eprintln!("kicking {}: {}", owner, failure);
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let quota = Arc::new(InMemoryStore::new("quota"));
//! let backends = CoordinatorBackends {
//!     profiles: Arc::new(InMemoryStore::new("Profiles")),
//!     stats: Arc::new(InMemoryStore::new("Stats")),
//!     quota,
//!     transport: Arc::new(LocalBroker::new()),
//!     leaderboards: vec![],
//! };
//! let shard: ShardCoordinator<serde_json::Value> =
//!     ShardCoordinator::new(ShardSyncConfig::default(), backends, Arc::new(Kick), None).unwrap();
//!
//! assert_eq!(shard.state(), CoordinatorState::Created);
//! shard.start().await.unwrap();
//! shard.shutdown().await;
//! # }
//! ```

mod types;
mod lifecycle;
mod session;
mod flush;

pub use types::{
    CoordinatorBackends, CoordinatorError, CoordinatorState, SessionFailure, SessionTerminator,
};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::{CachePayload, EntityCache};
use crate::config::{ConfigError, ShardSyncConfig};
use crate::init_tracker::InitTracker;
use crate::metrics;
use crate::resilience::admission::AdmissionGate;
use crate::resilience::client::ResilientStoreClient;
use crate::resilience::counters::OperationCounters;
use crate::resilience::retry::RetryPolicy;
use crate::scheduler::AdaptiveScheduler;
use crate::stats::store::StatisticsStore;
use crate::stats::view::{SessionStats, StatDisplay};
use crate::sync::bus::{StatsSyncHandler, SyncBus};
use crate::worker::BackgroundWorker;

pub struct ShardCoordinator<V> {
    config: ShardSyncConfig,
    state: watch::Sender<CoordinatorState>,
    state_rx: watch::Receiver<CoordinatorState>,
    client: Arc<ResilientStoreClient>,
    cache: Arc<EntityCache<V>>,
    stats: Arc<StatisticsStore>,
    session: Arc<SessionStats>,
    bus: Arc<SyncBus>,
    stats_handler: Arc<StatsSyncHandler>,
    tracker: InitTracker,
    scheduler: AdaptiveScheduler,
    terminator: Arc<dyn SessionTerminator>,
    autosave: Mutex<Option<BackgroundWorker>>,
}

impl<V: CachePayload> ShardCoordinator<V> {
    /// Wire up every component. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: ShardSyncConfig,
        backends: CoordinatorBackends,
        terminator: Arc<dyn SessionTerminator>,
        display: Option<Arc<dyn StatDisplay>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let counters = Arc::new(OperationCounters::new());
        let gate = AdmissionGate::new(config.budget_poll_interval());
        let client = Arc::new(ResilientStoreClient::new(
            backends.quota,
            gate,
            counters,
            RetryPolicy::from_config(&config),
        ));

        let cache = Arc::new(EntityCache::new(
            Arc::clone(&client),
            backends.profiles,
            config.profile_key_prefix.clone(),
            config.cache_max_age(),
        ));

        let bus = Arc::new(SyncBus::from_config(backends.transport, &config));
        let mut stats = StatisticsStore::new(Arc::clone(&client), backends.stats, config.stats_key_prefix.clone())
            .with_bus(Arc::clone(&bus), config.stats_topic.clone());
        for (stat, board) in backends.leaderboards {
            stats = stats.with_leaderboard(stat, board);
        }

        let session = Arc::new(SessionStats::new(display));
        let stats_handler = Arc::new(StatsSyncHandler::new(config.stats_topic.clone(), Arc::clone(&session)));
        let (state, state_rx) = watch::channel(CoordinatorState::Created);

        Ok(Self {
            scheduler: AdaptiveScheduler::new(config.scheduler_max_multiplier),
            config,
            state,
            state_rx,
            client,
            cache,
            stats: Arc::new(stats),
            session,
            bus,
            stats_handler,
            tracker: InitTracker::new(),
            terminator,
            autosave: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CoordinatorState> {
        self.state_rx.clone()
    }

    fn set_state(&self, next: CoordinatorState) {
        let _ = self.state.send(next);
        metrics::set_coordinator_state(&next.to_string());
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Running
    }

    pub fn config(&self) -> &ShardSyncConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<ResilientStoreClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<EntityCache<V>> {
        &self.cache
    }

    pub fn stats_store(&self) -> &Arc<StatisticsStore> {
        &self.stats
    }

    pub fn session(&self) -> &Arc<SessionStats> {
        &self.session
    }

    pub fn bus(&self) -> &Arc<SyncBus> {
        &self.bus
    }

    pub fn stats_handler(&self) -> &Arc<StatsSyncHandler> {
        &self.stats_handler
    }

    pub fn tracker(&self) -> &InitTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &AdaptiveScheduler {
        &self.scheduler
    }

    /// Live propagation to other shards is unavailable.
    pub fn is_sync_degraded(&self) -> bool {
        self.bus.is_degraded(&self.config.stats_topic)
    }
}
