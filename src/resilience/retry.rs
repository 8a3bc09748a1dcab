// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry policy and exponential backoff.
//!
//! Store operations go through [`crate::ResilientStoreClient`], which counts
//! attempts and consults the admission gate. The bare [`retry`] helper here is
//! for connection establishment, where there is no budget to respect.
//!
//! # Example
//!
//! ```
//! use shard_sync::resilience::retry::{backoff_delay, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_retries, 3);
//!
//! // base * 2^(attempt-1), capped
//! let base = Duration::from_secs(1);
//! let cap = Duration::from_secs(5);
//! assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(1));
//! assert_eq!(backoff_delay(3, base, cap), Duration::from_secs(4));
//! assert_eq!(backoff_delay(4, base, cap), Duration::from_secs(5));
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{secs, ShardSyncConfig};
use crate::storage::traits::RequestClass;

/// Retry behaviour for a single store operation. Immutable per call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
    /// How long to wait for request quota before fast-failing
    pub budget_wait_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ShardSyncConfig::default())
    }
}

impl RetryPolicy {
    /// Build from a validated config.
    #[must_use]
    pub fn from_config(config: &ShardSyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: secs(config.base_delay_secs),
            max_backoff: secs(config.max_backoff_secs),
            budget_wait_timeout: secs(config.budget_wait_timeout_secs),
        }
    }

    /// Fast-fail retry for initial startup connection.
    /// 5 attempts, failing after roughly 3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            budget_wait_timeout: Duration::from_secs(1),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            budget_wait_timeout: Duration::from_millis(50),
        }
    }

    /// Delay before the attempt after `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_backoff)
    }
}

/// `base * 2^(attempt-1)`, clamped to `cap`.
///
/// # Panics
///
/// Panics if `attempt` is zero or either duration is zero. These are caller
/// bugs; [`ShardSyncConfig::validate`] rules them out for config-built policies.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    assert!(attempt >= 1, "backoff attempt is 1-based (got 0)");
    assert!(!base.is_zero() && !cap.is_zero(), "backoff base and cap must be positive");

    2u32.checked_pow(attempt - 1)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Why a store operation did not produce data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OperationError {
    /// Quota never became available. Not retried: the store is overloaded, not broken.
    #[error("Budget timeout: no {class} quota after {waited:?}")]
    BudgetTimeout { class: RequestClass, waited: Duration },

    /// Every attempt failed with a transient error.
    #[error("Max retries exceeded for '{operation}' after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { operation: String, attempts: u32, last_error: String },
}

impl OperationError {
    pub fn is_budget_timeout(&self) -> bool {
        matches!(self, Self::BudgetTimeout { .. })
    }
}

/// Outcome of one logical store operation.
///
/// `data` is present only when `success` is true; `attempts` is 0 when the
/// operation never ran because the budget wait timed out.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<OperationError>,
    pub attempts: u32,
}

impl<T> OperationResult<T> {
    pub fn succeeded(data: T, attempts: u32) -> Self {
        Self { success: true, data: Some(data), error: None, attempts }
    }

    pub fn failed(error: OperationError, attempts: u32) -> Self {
        Self { success: false, data: None, error: Some(error), attempts }
    }

    pub fn into_result(self) -> Result<T, OperationError> {
        match (self.data, self.error) {
            (Some(data), _) if self.success => Ok(data),
            (_, Some(error)) => Err(error),
            // unreachable through the constructors above
            _ => Err(OperationError::MaxRetriesExceeded {
                operation: "unknown".to_string(),
                attempts: self.attempts,
                last_error: "no data".to_string(),
            }),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            attempts: self.attempts,
        }
    }
}

/// Retry `operation` with backoff, without budget or counters.
pub async fn retry<F, Fut, T, E>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!("Operation '{}' succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(val);
            }
            Err(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempt, policy.max_retries, err, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
