// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation counters for the resilient store client.
//!
//! Constructed explicitly and shared by `Arc`, so every test (and every
//! client) can have an isolated set. Each increment is also mirrored to the
//! `metrics` facade; the atomics here are the in-process view an operator can
//! snapshot and reset.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics;

#[derive(Debug, Default)]
pub struct OperationCounters {
    total_operations: AtomicU64,
    successful_operations: AtomicU64,
    failed_operations: AtomicU64,
    total_retries: AtomicU64,
    budget_waits: AtomicU64,
}

/// Point-in-time copy of [`OperationCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retries: u64,
    pub budget_waits: u64,
}

impl OperationCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_operation(&self) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, operation: &str) {
        self.successful_operations.fetch_add(1, Ordering::Relaxed);
        metrics::record_operation(operation, "success");
    }

    pub fn record_failure(&self, operation: &str) {
        self.failed_operations.fetch_add(1, Ordering::Relaxed);
        metrics::record_operation(operation, "failure");
    }

    pub fn record_retry(&self, operation: &str) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        metrics::record_retry(operation);
    }

    pub fn record_budget_wait(&self) {
        self.budget_waits.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_operations: self.total_operations.load(Ordering::Relaxed),
            successful_operations: self.successful_operations.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            budget_waits: self.budget_waits.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Operator action only; nothing in the crate calls it.
    pub fn reset(&self) {
        self.total_operations.store(0, Ordering::Relaxed);
        self.successful_operations.store(0, Ordering::Relaxed);
        self.failed_operations.store(0, Ordering::Relaxed);
        self.total_retries.store(0, Ordering::Relaxed);
        self.budget_waits.store(0, Ordering::Relaxed);
    }
}

impl CountersSnapshot {
    /// Fraction of finished operations that succeeded (1.0 when idle).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_operations + self.failed_operations;
        if finished == 0 {
            return 1.0;
        }
        self.successful_operations as f64 / finished as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = OperationCounters::new();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
        assert_eq!(counters.snapshot().success_rate(), 1.0);
    }

    #[test]
    fn test_counters_track_and_reset() {
        let counters = OperationCounters::new();
        counters.record_operation();
        counters.record_operation();
        counters.record_retry("get");
        counters.record_success("get");
        counters.record_failure("set");
        counters.record_budget_wait();

        let snap = counters.snapshot();
        assert_eq!(snap.total_operations, 2);
        assert_eq!(snap.total_retries, 1);
        assert_eq!(snap.successful_operations, 1);
        assert_eq!(snap.failed_operations, 1);
        assert_eq!(snap.budget_waits, 1);
        assert_eq!(snap.success_rate(), 0.5);

        counters.reset();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = OperationCounters::new();
        let b = OperationCounters::new();
        a.record_operation();
        assert_eq!(a.snapshot().total_operations, 1);
        assert_eq!(b.snapshot().total_operations, 0);
    }
}
