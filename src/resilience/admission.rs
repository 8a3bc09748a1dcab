// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Admission gate: wait for request quota before touching the store.
//!
//! The gate is a blocking wait, not a queue. Each caller polls the store's
//! remaining quota for its request class on its own, so concurrent callers get
//! no fairness or ordering guarantee. A wait that outlives its timeout returns
//! `false`; that means sustained overload and the caller should fast-fail
//! instead of retrying.
//!
//! # Shutdown
//!
//! [`AdmissionGate::stop`] puts the gate in draining mode and admits every
//! caller still waiting. From then on callers are admitted without polling,
//! so writes in flight when shutdown starts still land and the final flush
//! is not held hostage by an exhausted budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;
use crate::storage::traits::{QuotaSource, RequestClass};

pub struct AdmissionGate {
    poll_interval: Duration,
    stopped: CancellationToken,
    draining: AtomicBool,
}

impl AdmissionGate {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            stopped: CancellationToken::new(),
            draining: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Block until `source` reports at least one unit of `class` quota, or
    /// until `timeout` (measured from entry) elapses.
    ///
    /// On admission `on_admit` receives how long the caller waited.
    pub async fn await_quota<Q, F>(
        &self,
        source: &Q,
        class: RequestClass,
        timeout: Duration,
        on_admit: F,
    ) -> bool
    where
        Q: QuotaSource + ?Sized,
        F: FnOnce(Duration),
    {
        let started = Instant::now();

        if self.draining.load(Ordering::Acquire) {
            on_admit(Duration::ZERO);
            return true;
        }

        loop {
            let remaining = match source.remaining_quota(class).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(class = %class, error = %e, "Quota check failed, treating as exhausted");
                    0
                }
            };

            if remaining >= 1 {
                let waited = started.elapsed();
                if !waited.is_zero() {
                    metrics::record_budget_wait(class.as_str(), waited);
                }
                on_admit(waited);
                return true;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(class = %class, timeout = ?timeout, "Request budget exhausted, giving up");
                metrics::record_budget_timeout(class.as_str());
                return false;
            }

            let pause = self.poll_interval.min(timeout - waited);
            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.stopped.cancelled() => {
                    debug!(class = %class, "Admission gate stopped while waiting, admitting");
                    on_admit(started.elapsed());
                    return true;
                }
            }
        }
    }

    /// Switch to draining mode and admit all waiters.
    pub fn stop(&self) {
        self.draining.store(true, Ordering::Release);
        self.stopped.cancel();
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POLL_INTERVAL)
    }
}
