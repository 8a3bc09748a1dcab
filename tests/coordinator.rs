// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shard coordinator tests against in-memory stores and the local broker.
//!
//! Time is paused, so deadlines and backoff run instantly.
//!
//! # Running
//! ```bash
//! cargo test --test coordinator
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use shard_sync::storage::traits::{
    QuotaSource, RemoteStore, RequestClass, SortedEntry, SortedQuery, StorageError, UpdateTransform,
};
use shard_sync::sync::transport::{MessageHandler, SubscriptionHandle};
use shard_sync::{
    CoordinatorBackends, CoordinatorError, CoordinatorState, EntityId, InMemoryStore, LeaderboardRow,
    LeaderboardSink, LocalBroker, OwnerHandle, PubSubTransport, SessionFailure, SessionTerminator,
    ShardCoordinator, ShardSyncConfig, StatKind, StatisticsRecord, TransportError,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Profile {
    coins: u64,
}

#[derive(Default)]
struct RecordingTerminator(Mutex<Vec<(OwnerHandle, SessionFailure)>>);

impl RecordingTerminator {
    fn calls(&self) -> Vec<(OwnerHandle, SessionFailure)> {
        self.0.lock().clone()
    }
}

impl SessionTerminator for RecordingTerminator {
    fn terminate(&self, owner: OwnerHandle, failure: &SessionFailure) {
        self.0.lock().push((owner, failure.clone()));
    }
}

/// Stores and broker shared by every shard built from it.
struct Cluster {
    profiles: Arc<InMemoryStore>,
    stats: Arc<InMemoryStore>,
    board: Arc<InMemoryStore>,
    broker: LocalBroker,
}

impl Cluster {
    fn new() -> Self {
        Self {
            profiles: Arc::new(InMemoryStore::new("Profiles")),
            stats: Arc::new(InMemoryStore::new("Stats")),
            board: Arc::new(InMemoryStore::new("DonatedLeaderboard")),
            broker: LocalBroker::new(),
        }
    }

    fn backends(&self) -> CoordinatorBackends {
        CoordinatorBackends {
            profiles: self.profiles.clone(),
            stats: self.stats.clone(),
            quota: self.stats.clone(),
            transport: Arc::new(self.broker.clone()),
            leaderboards: vec![(StatKind::Donated, self.board.clone() as Arc<dyn RemoteStore>)],
        }
    }

    fn shard(&self, terminator: Arc<RecordingTerminator>) -> ShardCoordinator<Profile> {
        ShardCoordinator::new(fast_config(), self.backends(), terminator, None).unwrap()
    }

    fn stored_stats(&self, entity: u64) -> StatisticsRecord {
        self.stats
            .peek(&format!("Stats_{}", entity))
            .map(|v| StatisticsRecord::sanitize(&v))
            .unwrap_or_default()
    }
}

fn fast_config() -> ShardSyncConfig {
    ShardSyncConfig {
        base_delay_secs: 0.01,
        max_backoff_secs: 0.05,
        budget_wait_timeout_secs: 0.2,
        sync_base_delay_secs: 0.01,
        init_timeout_secs: 5.0,
        autosave_interval_secs: 0.0,
        leaderboard_page_size: 10,
        ..Default::default()
    }
}

fn id(n: u64) -> EntityId {
    EntityId::new(n).unwrap()
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

/// Delays every `get` by a fixed amount.
struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl QuotaSource for SlowStore {
    async fn remaining_quota(&self, class: RequestClass) -> Result<u32, StorageError> {
        self.inner.remaining_quota(class).await
    }
}

#[async_trait]
impl RemoteStore for SlowStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }

    async fn update(&self, key: &str, transform: UpdateTransform) -> Result<Option<Value>, StorageError> {
        self.inner.update(key, transform).await
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        self.inner.increment(key, delta).await
    }

    async fn sorted_read(&self, query: &SortedQuery) -> Result<Vec<SortedEntry>, StorageError> {
        self.inner.sorted_read(query).await
    }
}

/// Message service that is down for good.
struct DeadTransport;

#[async_trait]
impl PubSubTransport for DeadTransport {
    async fn publish(&self, _topic: &str, _payload: Value) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("message service down".into()))
    }

    async fn subscribe(&self, _topic: &str, _handler: MessageHandler) -> Result<SubscriptionHandle, TransportError> {
        Err(TransportError::Unavailable("message service down".into()))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), TransportError> {
        Err(TransportError::UnknownSubscription(handle))
    }
}

#[derive(Default)]
struct CapturedBoards(Mutex<Vec<(String, Vec<LeaderboardRow>)>>);

impl LeaderboardSink for CapturedBoards {
    fn publish(&self, board: &str, rows: &[LeaderboardRow]) {
        self.0.lock().push((board.to_string(), rows.to_vec()));
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_lifecycle_transitions() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    let mut states = shard.state_receiver();

    assert_eq!(shard.state(), CoordinatorState::Created);
    shard.start().await.unwrap();
    assert_eq!(shard.state(), CoordinatorState::Running);
    assert!(states.has_changed().unwrap());
    assert!(!shard.is_sync_degraded());

    assert_eq!(
        shard.start().await,
        Err(CoordinatorError::InvalidState { action: "start", state: CoordinatorState::Running })
    );

    shard.shutdown().await;
    assert_eq!(*states.borrow_and_update(), CoordinatorState::Stopped);

    // idempotent
    shard.shutdown().await;
    assert_eq!(shard.state(), CoordinatorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_join_requires_running() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    let owner = OwnerHandle::new(1, id(42));

    assert_eq!(
        shard.join_entity(owner).await,
        Err(SessionFailure::NotRunning(CoordinatorState::Created))
    );

    shard.start().await.unwrap();
    shard.shutdown().await;
    assert_eq!(
        shard.join_entity(owner).await,
        Err(SessionFailure::NotRunning(CoordinatorState::Stopped))
    );
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_join_modify_leave_persists_everything() {
    let cluster = Cluster::new();
    cluster.profiles.seed("Profile_42", json!({"coins": 3}));
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(1, id(42));
    shard.join_entity(owner).await.unwrap();
    assert_eq!(shard.payload(owner).unwrap(), Profile { coins: 3 });
    assert_eq!(shard.stats_of(id(42)), Some(StatisticsRecord::zeroed()));

    shard.modify_payload(owner, |p| p.coins += 4).unwrap();
    assert!(shard.record_stat(id(42), StatKind::Donated, 50));
    assert!(!shard.record_stat(id(42), StatKind::Donated, 10), "lower value must not win");

    assert!(shard.leave_entity(owner).await);
    assert_eq!(cluster.profiles.peek("Profile_42"), Some(json!({"coins": 7})));
    assert_eq!(cluster.stored_stats(42).get(StatKind::Donated), 50);
    assert!(!shard.cache().is_loaded(owner));
    assert!(shard.stats_of(id(42)).is_none());

    shard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_join_load_failure_terminates_once() {
    let cluster = Cluster::new();
    cluster.profiles.seed("Profile_42", json!("not a profile"));
    let terminator = Arc::new(RecordingTerminator::default());
    let shard = cluster.shard(terminator.clone());
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(1, id(42));
    let failure = shard.join_entity(owner).await.unwrap_err();
    assert!(matches!(failure, SessionFailure::CacheLoad { owner: o, .. } if o == owner));

    // the deadline passing later must not terminate again
    sleep(Duration::from_secs(10)).await;
    let calls = terminator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, owner);
    assert!(!shard.session().contains(id(42)));
    assert!(!shard.tracker().get(id(42)).unwrap().is_success());

    shard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_init_timeout_terminates_and_rolls_back() {
    let cluster = Cluster::new();
    let slow_profiles = Arc::new(SlowStore {
        inner: InMemoryStore::new("Profiles"),
        delay: Duration::from_secs(8),
    });
    let backends = CoordinatorBackends { profiles: slow_profiles, ..cluster.backends() };
    let terminator = Arc::new(RecordingTerminator::default());
    let shard: ShardCoordinator<Profile> =
        ShardCoordinator::new(fast_config(), backends, terminator.clone(), None).unwrap();
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(9, id(7));
    let result = shard.join_entity(owner).await;

    let expected = SessionFailure::InitTimeout { owner, after: Duration::from_secs(5) };
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(terminator.calls(), vec![(owner, expected)]);
    assert!(!shard.cache().is_loaded(owner), "late load must be rolled back");
    assert!(!shard.session().contains(id(7)));

    shard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_init_state_cleaned_up_after_grace() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    shard.join_entity(OwnerHandle::new(1, id(5))).await.unwrap();
    assert!(shard.tracker().get(id(5)).unwrap().is_success());

    sleep(Duration::from_secs(61)).await;
    assert!(shard.tracker().get(id(5)).is_none());

    shard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_lookup_reads_entities_owned_elsewhere() {
    let cluster = Cluster::new();
    cluster.profiles.seed("Profile_77", json!({"coins": 12}));
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    assert_eq!(shard.lookup(id(77)).await, Some(Profile { coins: 12 }));
    assert_eq!(shard.lookup(id(78)).await, Some(Profile::default()));

    shard.shutdown().await;
}

// =============================================================================
// Write-back
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_unsaved_state() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(1, id(42));
    shard.join_entity(owner).await.unwrap();
    shard.record_stat(id(42), StatKind::Raised, 900);
    shard.modify_payload(owner, |p| p.coins = 15).unwrap();

    shard.shutdown().await;

    assert_eq!(cluster.stored_stats(42).get(StatKind::Raised), 900);
    assert_eq!(cluster.profiles.peek("Profile_42"), Some(json!({"coins": 15})));
    assert!(shard.cache().owners().is_empty());
    assert!(shard.bus().subscribed_topics().is_empty());
    assert!(shard.client().gate().is_draining());
}

#[tokio::test(start_paused = true)]
async fn test_leave_waiting_on_quota_survives_shutdown() {
    let cluster = Cluster::new();
    let config = ShardSyncConfig { budget_wait_timeout_secs: 10.0, ..fast_config() };
    let shard: Arc<ShardCoordinator<Profile>> = Arc::new(
        ShardCoordinator::new(config, cluster.backends(), Arc::new(RecordingTerminator::default()), None).unwrap(),
    );
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(1, id(42));
    shard.join_entity(owner).await.unwrap();
    shard.record_stat(id(42), StatKind::Donated, 50);

    // the leave's save sits in the admission gate when shutdown begins
    cluster.stats.set_quota(RequestClass::Update, 0);
    let leaving = {
        let shard = shard.clone();
        tokio::spawn(async move { shard.leave_entity(owner).await })
    };
    sleep(Duration::from_millis(300)).await;
    shard.shutdown().await;

    assert!(leaving.await.unwrap());
    assert_eq!(cluster.stored_stats(42).get(StatKind::Donated), 50);
    assert!(shard.session().departed().is_empty());
    assert_eq!(shard.state(), CoordinatorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failed_leave_is_saved_by_next_autosave() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(1, id(7));
    shard.join_entity(owner).await.unwrap();
    shard.record_stat(id(7), StatKind::Raised, 9);
    shard.modify_payload(owner, |p| p.coins = 5).unwrap();

    cluster.stats.set_quota(RequestClass::Update, 0);
    cluster.stats.set_quota(RequestClass::SetIncrement, 0);
    assert!(!shard.leave_entity(owner).await);

    // the session is over, but nothing it wrote is lost
    assert!(shard.stats_of(id(7)).is_none());
    assert_eq!(shard.session().departed(), vec![id(7)]);
    assert_eq!(shard.cache().departed(), vec![owner]);
    assert_eq!(cluster.stored_stats(7).get(StatKind::Raised), 0);

    cluster.stats.clear_quota(RequestClass::Update);
    cluster.stats.clear_quota(RequestClass::SetIncrement);
    assert_eq!(shard.autosave_now().await, (1, 0));

    assert_eq!(cluster.stored_stats(7).get(StatKind::Raised), 9);
    assert_eq!(cluster.profiles.peek("Profile_7"), Some(json!({"coins": 5})));
    assert!(shard.session().departed().is_empty());
    assert!(shard.cache().departed().is_empty());
    assert!(!shard.cache().is_loaded(owner));

    shard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_leave_is_saved_by_shutdown() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    let owner = OwnerHandle::new(1, id(8));
    shard.join_entity(owner).await.unwrap();
    shard.record_stat(id(8), StatKind::Visits, 3);
    shard.modify_payload(owner, |p| p.coins = 11).unwrap();

    cluster.stats.set_quota(RequestClass::Update, 0);
    cluster.stats.set_quota(RequestClass::SetIncrement, 0);
    assert!(!shard.leave_entity(owner).await);

    // draining gate admits the flush despite the empty budget
    shard.shutdown().await;
    assert_eq!(cluster.stored_stats(8).get(StatKind::Visits), 3);
    assert_eq!(cluster.profiles.peek("Profile_8"), Some(json!({"coins": 11})));
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_failed_leave_keeps_unsaved_data() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    let first = OwnerHandle::new(1, id(9));
    shard.join_entity(first).await.unwrap();
    shard.record_stat(id(9), StatKind::Donated, 40);
    shard.modify_payload(first, |p| p.coins = 8).unwrap();

    cluster.stats.set_quota(RequestClass::Update, 0);
    cluster.stats.set_quota(RequestClass::SetIncrement, 0);
    assert!(!shard.leave_entity(first).await);
    cluster.stats.clear_quota(RequestClass::Update);
    cluster.stats.clear_quota(RequestClass::SetIncrement);

    let second = OwnerHandle::new(2, id(9));
    shard.join_entity(second).await.unwrap();
    assert_eq!(shard.payload(second).unwrap(), Profile { coins: 8 });
    assert_eq!(shard.stats_of(id(9)).unwrap().get(StatKind::Donated), 40);
    assert!(shard.session().is_dirty(id(9)));
    assert!(shard.session().departed().is_empty());

    assert!(shard.leave_entity(second).await);
    assert_eq!(cluster.stored_stats(9).get(StatKind::Donated), 40);
    assert_eq!(cluster.profiles.peek("Profile_9"), Some(json!({"coins": 8})));

    shard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_autosave_writes_dirty_stats() {
    let cluster = Cluster::new();
    let config = ShardSyncConfig { autosave_interval_secs: 30.0, ..fast_config() };
    let shard: ShardCoordinator<Profile> = ShardCoordinator::new(
        config,
        cluster.backends(),
        Arc::new(RecordingTerminator::default()),
        None,
    )
    .unwrap();
    shard.start().await.unwrap();

    shard.join_entity(OwnerHandle::new(1, id(3))).await.unwrap();
    shard.record_stat(id(3), StatKind::Visits, 4);
    assert_eq!(cluster.stored_stats(3).get(StatKind::Visits), 0);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(cluster.stored_stats(3).get(StatKind::Visits), 4);
    assert!(!shard.session().is_dirty(id(3)));

    // nothing dirty: the next autosave writes nothing
    assert_eq!(shard.autosave_now().await, (0, 0));

    shard.shutdown().await;
}

// =============================================================================
// Cross-shard convergence
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_shards_converge_on_maximum() {
    let cluster = Cluster::new();
    let shard_a = cluster.shard(Arc::new(RecordingTerminator::default()));
    let shard_b = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard_a.start().await.unwrap();
    shard_b.start().await.unwrap();

    shard_a.join_entity(OwnerHandle::new(1, id(42))).await.unwrap();
    shard_b.join_entity(OwnerHandle::new(2, id(42))).await.unwrap();

    shard_a.record_stat(id(42), StatKind::Donated, 50);
    shard_b.record_stat(id(42), StatKind::Donated, 30);

    assert_eq!(shard_a.autosave_now().await, (1, 0));
    assert_eq!(shard_b.autosave_now().await, (1, 0));
    settle().await;

    assert_eq!(cluster.stored_stats(42).get(StatKind::Donated), 50);
    assert_eq!(shard_a.stats_of(id(42)).unwrap().get(StatKind::Donated), 50);
    assert_eq!(shard_b.stats_of(id(42)).unwrap().get(StatKind::Donated), 50);
    assert_eq!(cluster.board.peek("42"), Some(json!(50)));
    assert!(shard_b.stats_handler().applied() >= 1);

    shard_a.shutdown().await;
    shard_b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_updates_for_absent_entities_are_ignored() {
    let cluster = Cluster::new();
    let shard_a = cluster.shard(Arc::new(RecordingTerminator::default()));
    let shard_b = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard_a.start().await.unwrap();
    shard_b.start().await.unwrap();

    shard_a.join_entity(OwnerHandle::new(1, id(8))).await.unwrap();
    shard_a.record_stat(id(8), StatKind::Visits, 2);
    shard_a.autosave_now().await;
    settle().await;

    assert!(shard_b.stats_of(id(8)).is_none());
    assert!(shard_b.session().is_empty());

    shard_a.shutdown().await;
    shard_b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_degraded_sync_keeps_serving() {
    let cluster = Cluster::new();
    let backends = CoordinatorBackends { transport: Arc::new(DeadTransport), ..cluster.backends() };
    let shard: ShardCoordinator<Profile> =
        ShardCoordinator::new(fast_config(), backends, Arc::new(RecordingTerminator::default()), None).unwrap();

    shard.start().await.unwrap();
    assert!(shard.is_running());
    assert!(shard.is_sync_degraded());

    shard.join_entity(OwnerHandle::new(1, id(4))).await.unwrap();
    shard.record_stat(id(4), StatKind::Donated, 10);
    // store write succeeds even though the announcement cannot be published
    assert_eq!(shard.autosave_now().await, (1, 0));
    assert_eq!(cluster.stored_stats(4).get(StatKind::Donated), 10);

    shard.shutdown().await;
}

// =============================================================================
// Leaderboards
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_leaderboard_refresh_on_ready_event() {
    let cluster = Cluster::new();
    let shard = cluster.shard(Arc::new(RecordingTerminator::default()));
    shard.start().await.unwrap();

    for (session, entity, donated) in [(1, 10, 300), (2, 11, 700), (3, 12, 500)] {
        shard.join_entity(OwnerHandle::new(session, id(entity))).await.unwrap();
        shard.record_stat(id(entity), StatKind::Donated, donated);
    }
    shard.autosave_now().await;

    let sink = Arc::new(CapturedBoards::default());
    let board = shard.register_leaderboard(StatKind::Donated, Some(sink.clone())).unwrap();
    assert!(shard.register_leaderboard(StatKind::Visits, None).is_none());

    assert!(shard.handle_ready_event("DonatedLeaderboard").await);
    assert!(!shard.handle_ready_event("VisitsLeaderboard").await);

    let ranked: Vec<(usize, u64, i64)> =
        board.snapshot().iter().map(|r| (r.rank, r.entity.get(), r.value)).collect();
    assert_eq!(ranked, vec![(1, 11, 700), (2, 12, 500), (3, 10, 300)]);
    assert_eq!(sink.0.lock().len(), 1);

    // scheduled refresh runs on its own once the base interval passes
    sleep(Duration::from_secs(61)).await;
    assert_eq!(sink.0.lock().len(), 2);
    assert_eq!(shard.scheduler().state("DonatedLeaderboard").unwrap().consecutive_failures, 0);

    shard.shutdown().await;
    assert!(shard.scheduler().resources().is_empty());
}
