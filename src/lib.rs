// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Shard Sync
//!
//! Resilience and cross-shard synchronization for game servers whose
//! persistent state lives in a quota-limited remote key-value store.
//!
//! ## Architecture
//!
//! Each server shard runs one [`ShardCoordinator`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardCoordinator                       │
//! │  • join / leave entities under an init deadline            │
//! │  • autosave, shutdown flush                                │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │   EntityCache    │ │ StatisticsStore  │ │ AdaptiveScheduler│
//! │ durable/temp TTL │ │ max-merge writes │ │ leaderboards,    │
//! │ payload maps     │ │ leaderboard      │ │ backoff on fail  │
//! └──────────────────┘ │ mirrors          │ └──────────────────┘
//!          │           └──────────────────┘          │
//!          │                    │   │                 │
//!          ▼                    ▼   └──────────┐      ▼
//! ┌─────────────────────────────────────────┐  │
//! │          ResilientStoreClient           │  │
//! │  • AdmissionGate waits for quota        │  ▼
//! │  • exponential backoff retries          │ ┌──────────────────┐
//! │  • OperationCounters + metrics          │ │     SyncBus      │
//! └─────────────────────────────────────────┘ │ publish / retry  │
//!                     │                       │ subscribe        │
//!                     ▼                       └──────────────────┘
//!            RemoteStore (Redis, memory)       PubSubTransport
//!                                              (Redis, local)
//! ```
//!
//! Statistics only ever grow: every write, on every shard, is a per-stat
//! maximum. Shards converge on the same values whatever order saves and
//! cross-shard messages arrive in.
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`ShardCoordinator`] tying everything together
//! - [`resilience`]: retries, admission control, counters
//! - [`storage`]: the store seam with Redis and in-memory backends
//! - [`cache`]: TTL cache and the per-owner entity cache
//! - [`stats`]: statistics records, store, and session view
//! - [`sync`]: cross-shard bus and its transports
//! - [`init_tracker`]: per-entity initialization deadlines
//! - [`scheduler`]: adaptive refresh loops
//! - [`leaderboard`]: ranked reads of the mirrored stats

pub mod config;
pub mod identity;
pub mod metrics;
pub mod worker;
pub mod storage;
pub mod resilience;
pub mod cache;
pub mod stats;
pub mod sync;
pub mod init_tracker;
pub mod scheduler;
pub mod leaderboard;
pub mod coordinator;

pub use config::{ConfigError, ShardSyncConfig};
pub use identity::{EntityId, OwnerHandle};
pub use coordinator::{
    CoordinatorBackends, CoordinatorError, CoordinatorState, SessionFailure, SessionTerminator,
    ShardCoordinator,
};
pub use storage::traits::{
    QuotaSource, RemoteStore, RequestClass, SortedEntry, SortedQuery, StorageError, UpdateTransform,
};
pub use storage::memory::InMemoryStore;
pub use storage::redis::RedisStore;
pub use resilience::admission::AdmissionGate;
pub use resilience::client::ResilientStoreClient;
pub use resilience::counters::{CountersSnapshot, OperationCounters};
pub use resilience::retry::{backoff_delay, OperationError, OperationResult, RetryPolicy};
pub use cache::{CacheError, CachePayload, EntityCache, TtlCache};
pub use stats::{SessionStats, StatDisplay, StatKind, StatisticsRecord, StatisticsStore};
pub use sync::{
    CrossServerMessage, LocalBroker, PubSubTransport, StatsSyncHandler, SyncBus, TransportError,
};
pub use sync::redis::RedisPubSub;
pub use init_tracker::{InitError, InitState, InitTracker};
pub use scheduler::{AdaptiveScheduler, RefreshError, RefreshTask};
pub use leaderboard::{LeaderboardRefresher, LeaderboardRow, LeaderboardSink};
pub use metrics::LatencyTimer;
