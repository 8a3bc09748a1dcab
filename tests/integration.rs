// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests against a real Redis.
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: store calls, cross-shard convergence
//! - `failure_*` - Failure scenarios: unreachable backend

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use shard_sync::stats::record::merge_transform;
use shard_sync::{
    AdmissionGate, CoordinatorBackends, EntityId, OperationCounters, OwnerHandle, RedisPubSub, RedisStore,
    RemoteStore, ResilientStoreClient, RetryPolicy, SessionFailure, SessionTerminator, ShardCoordinator,
    ShardSyncConfig, SortedQuery, StatKind, StatisticsRecord,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

const BUDGET: u32 = 10_000;

struct Ignore;

impl SessionTerminator for Ignore {
    fn terminate(&self, owner: OwnerHandle, failure: &SessionFailure) {
        panic!("unexpected termination of {}: {}", owner, failure);
    }
}

fn id(n: u64) -> EntityId {
    EntityId::new(n).unwrap()
}

async fn shard_on(url: &str) -> ShardCoordinator<serde_json::Value> {
    let profiles = Arc::new(RedisStore::connect(url, "Profiles", Some("test:"), BUDGET).await.unwrap());
    let stats = Arc::new(RedisStore::connect(url, "Stats", Some("test:"), BUDGET).await.unwrap());
    let board = Arc::new(RedisStore::connect(url, "DonatedLeaderboard", Some("test:"), BUDGET).await.unwrap());
    let transport = Arc::new(RedisPubSub::connect(url, Some("test:")).await.unwrap());

    let backends = CoordinatorBackends {
        profiles,
        stats: stats.clone(),
        quota: stats,
        transport,
        leaderboards: vec![(StatKind::Donated, board as Arc<dyn RemoteStore>)],
    };
    let config = ShardSyncConfig {
        base_delay_secs: 0.05,
        autosave_interval_secs: 0.0,
        ..Default::default()
    };
    ShardCoordinator::new(config, backends, Arc::new(Ignore), None).unwrap()
}

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_store_operations() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    let store = Arc::new(RedisStore::connect(&url, "Stats", None, BUDGET).await.unwrap());
    let client = ResilientStoreClient::new(
        store.clone(),
        AdmissionGate::default(),
        Arc::new(OperationCounters::new()),
        RetryPolicy::default(),
    );

    assert!(client.set(store.as_ref(), "plain", json!({"a": 1})).await.success);
    assert_eq!(client.get(store.as_ref(), "plain").await.data, Some(Some(json!({"a": 1}))));
    assert_eq!(client.get(store.as_ref(), "absent").await.data, Some(None));

    assert_eq!(client.increment(store.as_ref(), "visits", 2).await.data, Some(2));
    assert_eq!(client.increment(store.as_ref(), "visits", 3).await.data, Some(5));

    let first = StatisticsRecord::new().with(StatKind::Donated, 50);
    let second = StatisticsRecord::new().with(StatKind::Donated, 30).with(StatKind::Raised, 7);
    client.update(store.as_ref(), "Stats_1", merge_transform(first)).await;
    let stored = client.update(store.as_ref(), "Stats_1", merge_transform(second)).await.data.flatten();
    let record = StatisticsRecord::sanitize(&stored.unwrap());
    assert_eq!(record.get(StatKind::Donated), 50);
    assert_eq!(record.get(StatKind::Raised), 7);

    for (key, value) in [("1", 20), ("2", 80), ("3", 50)] {
        client.set(store.as_ref(), key, json!(value)).await;
    }
    let top = client.sorted_read(store.as_ref(), &SortedQuery::top(2)).await.data.unwrap();
    let keys: Vec<&str> = top.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["2", "3"]);

    let counters = client.counters().snapshot();
    assert_eq!(counters.failed_operations, 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_two_shards_converge_over_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    let shard_a = shard_on(&url).await;
    let shard_b = shard_on(&url).await;
    shard_a.start().await.unwrap();
    shard_b.start().await.unwrap();
    assert!(!shard_a.is_sync_degraded());

    shard_a.join_entity(OwnerHandle::new(1, id(42))).await.unwrap();
    shard_b.join_entity(OwnerHandle::new(2, id(42))).await.unwrap();
    shard_a.record_stat(id(42), StatKind::Donated, 50);
    shard_b.record_stat(id(42), StatKind::Donated, 30);

    assert_eq!(shard_a.autosave_now().await, (1, 0));
    assert_eq!(shard_b.autosave_now().await, (1, 0));
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(shard_a.stats_of(id(42)).unwrap().get(StatKind::Donated), 50);
    assert_eq!(shard_b.stats_of(id(42)).unwrap().get(StatKind::Donated), 50);

    let board = shard_a.register_leaderboard(StatKind::Donated, None).unwrap();
    assert!(shard_a.handle_ready_event("DonatedLeaderboard").await);
    assert_eq!(board.snapshot().first().map(|row| (row.entity, row.value)), Some((id(42), 50)));

    shard_a.shutdown().await;
    shard_b.shutdown().await;
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
#[ignore] // Slow: walks the startup retry schedule
async fn failure_unreachable_store_fails_fast() {
    let result = RedisStore::connect("redis://127.0.0.1:1", "Stats", None, BUDGET).await;
    assert!(result.is_err());
}
