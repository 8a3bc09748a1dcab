// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic shard-sync usage example.
//!
//! Demonstrates:
//! 1. Two shards sharing in-memory stores and a local message broker
//! 2. The same entity joining both shards
//! 3. Conflicting stat writes converging on the maximum
//! 4. A leaderboard refresh
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=shard_sync=debug cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use shard_sync::{
    CoordinatorBackends, EntityId, InMemoryStore, LeaderboardRow, LeaderboardSink, LocalBroker, OwnerHandle,
    RemoteStore, SessionFailure, SessionTerminator, ShardCoordinator, ShardSyncConfig, StatKind,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Profile {
    coins: u64,
    title: Option<String>,
}

struct Kick;

impl SessionTerminator for Kick {
    fn terminate(&self, owner: OwnerHandle, failure: &SessionFailure) {
        println!("   ⛔ Kicking {}: {}", owner, failure);
    }
}

struct PrintBoard;

impl LeaderboardSink for PrintBoard {
    fn publish(&self, board: &str, rows: &[LeaderboardRow]) {
        println!("   ┌─ {}", board);
        for row in rows {
            println!("   │  {}. entity {} → {}", row.rank, row.entity, row.value);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the crate emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              shard-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Shared backends, two shards
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Building two shards over shared stores...");

    let stats = Arc::new(InMemoryStore::new("Stats"));
    let board: Arc<dyn RemoteStore> = Arc::new(InMemoryStore::new("DonatedLeaderboard"));
    let backends = CoordinatorBackends {
        profiles: Arc::new(InMemoryStore::new("Profiles")),
        stats: stats.clone(),
        quota: stats.clone(),
        transport: Arc::new(LocalBroker::new()),
        leaderboards: vec![(StatKind::Donated, board)],
    };
    let config = ShardSyncConfig {
        autosave_interval_secs: 5.0,
        ..Default::default()
    };

    let shard_a: ShardCoordinator<Profile> =
        ShardCoordinator::new(config.clone(), backends.clone(), Arc::new(Kick), None)?;
    let shard_b: ShardCoordinator<Profile> = ShardCoordinator::new(config, backends, Arc::new(Kick), None)?;

    shard_a.start().await?;
    shard_b.start().await?;
    println!("   ✅ Shards running: {} / {}", shard_a.state(), shard_b.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Sessions
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🎮 Joining entities...");
    let alice = EntityId::new(42).ok_or("zero entity id")?;
    let bob = EntityId::new(7).ok_or("zero entity id")?;
    let alice_a = OwnerHandle::new(1, alice);
    let alice_b = OwnerHandle::new(2, alice);
    let bob_a = OwnerHandle::new(3, bob);

    for (shard, owner) in [(&shard_a, alice_a), (&shard_b, alice_b), (&shard_a, bob_a)] {
        shard.join_entity(owner).await?;
        println!("   └─ joined {}", owner);
    }

    shard_a.modify_payload(alice_a, |p| {
        p.coins += 100;
        p.title = Some("Patron".into());
    })?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Conflicting writes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Recording conflicting stats (shard A: 50, shard B: 30)...");
    shard_a.record_stat(alice, StatKind::Donated, 50);
    shard_b.record_stat(alice, StatKind::Donated, 30);
    shard_a.record_stat(bob, StatKind::Donated, 120);

    let (saved_a, _) = shard_a.autosave_now().await;
    let (saved_b, _) = shard_b.autosave_now().await;
    println!("   └─ saved {} + {} records", saved_a, saved_b);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (name, shard) in [("A", &shard_a), ("B", &shard_b)] {
        let donated = shard.stats_of(alice).map(|r| r.get(StatKind::Donated));
        println!("   └─ shard {} sees Donated = {:?}", name, donated);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Leaderboard
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🏆 Refreshing leaderboard...");
    shard_a.register_leaderboard(StatKind::Donated, Some(Arc::new(PrintBoard)));
    shard_a.handle_ready_event("DonatedLeaderboard").await;

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Client counters (shard A):");
    let counters = shard_a.client().counters().snapshot();
    println!("   └─ {:?}", counters);
    println!("   └─ success rate {:.1}%", counters.success_rate() * 100.0);

    println!("\n📈 Raw metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    shard_a.leave_entity(bob_a).await;
    shard_a.shutdown().await;
    shard_b.shutdown().await;
    println!("   ✅ Shards stopped: {} / {}", shard_a.state(), shard_b.state());
    println!("   └─ stored: {:?}", stats.peek("Stats_42"));

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.4}s", samples.len(), sum)
                }
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    for line in &lines {
        println!("   └─ {}", line);
    }
}
