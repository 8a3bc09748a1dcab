// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for shard-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The game server embedding this crate chooses the exporter.
//!
//! # Metric Naming Convention
//! - `shard_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `class`: get, set_increment, update, sorted_read
//! - `operation`: `{store}.{op}`, e.g. `Stats.update`
//! - `status`: success, failure

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record the final outcome of one logical store operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "shard_sync_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a retry (every attempt after the first)
pub fn record_retry(operation: &str) {
    counter!(
        "shard_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record single-attempt latency
pub fn record_latency(class: &str, duration: Duration) {
    histogram!(
        "shard_sync_attempt_seconds",
        "class" => class.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record time spent waiting for request quota
pub fn record_budget_wait(class: &str, waited: Duration) {
    histogram!(
        "shard_sync_budget_wait_seconds",
        "class" => class.to_string()
    )
    .record(waited.as_secs_f64());
}

/// Record a budget wait that gave up
pub fn record_budget_timeout(class: &str) {
    counter!(
        "shard_sync_budget_timeouts_total",
        "class" => class.to_string()
    )
    .increment(1);
}

/// Set current entry count of a named cache
pub fn set_cache_entries(cache: &str, count: usize) {
    gauge!(
        "shard_sync_cache_entries",
        "cache" => cache.to_string()
    )
    .set(count as f64);
}

/// Record entries dropped by a sweep
pub fn record_cache_eviction(cache: &str, count: usize) {
    counter!(
        "shard_sync_cache_evictions_total",
        "cache" => cache.to_string()
    )
    .increment(count as u64);
}

pub fn record_cache_lookup(cache: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "shard_sync_cache_lookups_total",
        "cache" => cache.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record handling of an inbound sync message (applied, dropped, invalid)
pub fn record_sync_message(topic: &str, outcome: &str) {
    counter!(
        "shard_sync_messages_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_publish(topic: &str, success: bool) {
    counter!(
        "shard_sync_publishes_total",
        "topic" => topic.to_string(),
        "status" => status(success)
    )
    .increment(1);
}

/// 1 while the shard runs without a live subscription
pub fn set_sync_degraded(topic: &str, degraded: bool) {
    gauge!(
        "shard_sync_degraded",
        "topic" => topic.to_string()
    )
    .set(if degraded { 1.0 } else { 0.0 });
}

/// Record how an initialization attempt ended (completed, failed, timed_out)
pub fn record_init_outcome(outcome: &str) {
    counter!(
        "shard_sync_init_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_refresh(task: &str, success: bool) {
    counter!(
        "shard_sync_refreshes_total",
        "task" => task.to_string(),
        "status" => status(success)
    )
    .increment(1);
}

/// Set the interval the scheduler will wait before the next refresh
pub fn set_refresh_interval(task: &str, interval: Duration) {
    gauge!(
        "shard_sync_refresh_interval_seconds",
        "task" => task.to_string()
    )
    .set(interval.as_secs_f64());
}

pub fn record_stats_save(success: bool) {
    counter!(
        "shard_sync_stats_saves_total",
        "status" => status(success)
    )
    .increment(1);
}

/// Set coordinator state (for monitoring lifecycle transitions)
pub fn set_coordinator_state(state: &str) {
    counter!(
        "shard_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records attempt latency on drop
pub struct LatencyTimer {
    class: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(class: &'static str) -> Self {
        Self {
            class,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.class, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These verify the API doesn't panic without a recorder installed.

    #[test]
    fn test_record_without_recorder() {
        record_operation("Stats.update", "success");
        record_retry("Stats.update");
        record_budget_wait("update", Duration::from_millis(200));
        record_budget_timeout("update");
        set_cache_entries("profiles", 3);
        record_cache_eviction("profiles", 1);
        record_cache_lookup("profiles", false);
        record_sync_message("StatsSync", "applied");
        record_publish("StatsSync", true);
        set_sync_degraded("StatsSync", true);
        record_init_outcome("timed_out");
        record_refresh("leaderboard", false);
        set_refresh_interval("leaderboard", Duration::from_secs(20));
        record_stats_save(true);
        set_coordinator_state("Running");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("get");
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    #[test]
    fn test_counters_reach_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_operation("Stats.update", "failure");
            record_operation("Stats.update", "failure");
            record_retry("Stats.update");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let failures = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "shard_sync_operations_total")
            .map(|(_, _, _, value)| value.clone());
        assert_eq!(failures, Some(&DebugValue::Counter(2)));

        let retries = snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "shard_sync_retries_total");
        assert!(retries);
    }
}
