// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilient store client.
//!
//! Executes exactly one logical store operation: admission first, then up to
//! `max_retries` attempts with exponential backoff between them.
//!
//! ```text
//! total_operations += 1
//!       │
//!       ▼
//! ┌──────────────────────┐   timeout   ┌───────────────────────────────┐
//! │ AdmissionGate::await │ ──────────► │ failed += 1, "Budget timeout" │
//! └──────────────────────┘             │ attempts = 0 (never retried)  │
//!       │ admitted                     └───────────────────────────────┘
//!       ▼
//! attempt 1..=max_retries ──ok──► successful += 1, attempts = n
//!       │ err: log, total_retries += 1, sleep backoff(n)
//!       ▼
//! exhausted ──► failed += 1, "Max retries exceeded", attempts = max_retries
//! ```
//!
//! The client cannot tell whether an operation is idempotent. Callers only pass
//! operations that are safe to repeat: overwrites of values derived through a
//! conflict-safe merge, store-side atomic increments, or reads.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::admission::AdmissionGate;
use super::counters::OperationCounters;
use super::retry::{OperationError, OperationResult, RetryPolicy};
use crate::metrics::LatencyTimer;
use crate::storage::traits::{
    QuotaSource, RemoteStore, RequestClass, SortedEntry, SortedQuery, StorageError, UpdateTransform,
};

pub struct ResilientStoreClient {
    quota: Arc<dyn QuotaSource>,
    gate: AdmissionGate,
    counters: Arc<OperationCounters>,
    policy: RetryPolicy,
}

impl ResilientStoreClient {
    pub fn new(
        quota: Arc<dyn QuotaSource>,
        gate: AdmissionGate,
        counters: Arc<OperationCounters>,
        policy: RetryPolicy,
    ) -> Self {
        Self { quota, gate, counters, policy }
    }

    /// Client with fast retry and fresh counters, for unit tests.
    #[cfg(test)]
    pub(crate) fn for_tests(quota: Arc<dyn QuotaSource>) -> Self {
        Self::new(quota, AdmissionGate::default(), Arc::new(OperationCounters::new()), RetryPolicy::test())
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn counters(&self) -> &Arc<OperationCounters> {
        &self.counters
    }

    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Run `operation` under admission control and bounded retry using the
    /// client's default policy.
    pub async fn retry_operation_with_backoff<F, Fut, T>(
        &self,
        operation_name: &str,
        class: RequestClass,
        operation: F,
    ) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.execute_with_policy(operation_name, class, &self.policy, operation).await
    }

    /// Same as [`retry_operation_with_backoff`](Self::retry_operation_with_backoff)
    /// with a per-call policy.
    pub async fn execute_with_policy<F, Fut, T>(
        &self,
        operation_name: &str,
        class: RequestClass,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.counters.record_operation();

        let counters = &self.counters;
        let admitted = self
            .gate
            .await_quota(self.quota.as_ref(), class, policy.budget_wait_timeout, |waited| {
                if !waited.is_zero() {
                    counters.record_budget_wait();
                }
            })
            .await;

        if !admitted {
            self.counters.record_failure(operation_name);
            warn!(
                operation = %operation_name,
                class = %class,
                timeout = ?policy.budget_wait_timeout,
                "Budget timeout, failing fast"
            );
            return OperationResult::failed(
                OperationError::BudgetTimeout { class, waited: policy.budget_wait_timeout },
                0,
            );
        }

        let max_attempts = policy.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.counters.record_retry(operation_name);
            }

            let outcome = {
                let _timer = LatencyTimer::new(class.as_str());
                operation().await
            };

            match outcome {
                Ok(data) => {
                    if attempt > 1 {
                        debug!(operation = %operation_name, attempt, "Operation recovered after retry");
                    }
                    self.counters.record_success(operation_name);
                    return OperationResult::succeeded(data, attempt);
                }
                Err(err) => {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Store operation failed"
                    );
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        sleep(policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        self.counters.record_failure(operation_name);
        OperationResult::failed(
            OperationError::MaxRetriesExceeded {
                operation: operation_name.to_string(),
                attempts: max_attempts,
                last_error,
            },
            max_attempts,
        )
    }

    pub async fn get(&self, store: &dyn RemoteStore, key: &str) -> OperationResult<Option<Value>> {
        let name = format!("{}.get", store.name());
        self.retry_operation_with_backoff(&name, RequestClass::Get, || store.get(key)).await
    }

    pub async fn set(&self, store: &dyn RemoteStore, key: &str, value: Value) -> OperationResult<()> {
        let name = format!("{}.set", store.name());
        self.retry_operation_with_backoff(&name, RequestClass::SetIncrement, || {
            store.set(key, value.clone())
        })
        .await
    }

    /// Merge-update through the store's compare-and-swap. `transform` must be
    /// a pure data function (see [`UpdateTransform`]).
    pub async fn update(
        &self,
        store: &dyn RemoteStore,
        key: &str,
        transform: UpdateTransform,
    ) -> OperationResult<Option<Value>> {
        let name = format!("{}.update", store.name());
        self.retry_operation_with_backoff(&name, RequestClass::Update, || {
            store.update(key, transform.clone())
        })
        .await
    }

    /// Atomic store-side increment.
    pub async fn increment(&self, store: &dyn RemoteStore, key: &str, delta: i64) -> OperationResult<i64> {
        let name = format!("{}.increment", store.name());
        self.retry_operation_with_backoff(&name, RequestClass::SetIncrement, || store.increment(key, delta))
            .await
    }

    pub async fn sorted_read(
        &self,
        store: &dyn RemoteStore,
        query: &SortedQuery,
    ) -> OperationResult<Vec<SortedEntry>> {
        let name = format!("{}.sorted_read", store.name());
        self.retry_operation_with_backoff(&name, RequestClass::SortedRead, || store.sorted_read(query))
            .await
    }
}
