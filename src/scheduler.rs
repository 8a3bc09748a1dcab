// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Adaptive refresh scheduler.
//!
//! Each registered [`RefreshTask`] gets its own loop:
//!
//! ```text
//! Idle ──sleep(interval)──► Running ──ok──► failures = 0, interval = base
//!   ▲                          │
//!   │                          └─err─► failures += 1,
//!   │                                  interval = base * min(2^failures, cap)
//!   └──────────────────────────────────────┘
//! ```
//!
//! [`AdaptiveScheduler::handle_ready_event`] runs one extra refresh right away
//! (a new viewer wants data now). It does not touch the loop's failure
//! streak or timer.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::resilience::retry::OperationError;
use crate::worker::BackgroundWorker;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("store read failed: {0}")]
    Store(#[from] OperationError),
    #[error("refresh failed: {0}")]
    Failed(String),
}

/// A derived view that is periodically rebuilt from the store.
#[async_trait]
pub trait RefreshTask: Send + Sync {
    fn name(&self) -> &str;

    async fn refresh(&self) -> Result<(), RefreshError>;
}

/// `base * min(2^failures, max_multiplier)`.
pub fn next_interval(base: Duration, consecutive_failures: u32, max_multiplier: u32) -> Duration {
    let multiplier = 2u32
        .checked_pow(consecutive_failures)
        .unwrap_or(u32::MAX)
        .min(max_multiplier.max(1));
    base.saturating_mul(multiplier)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleState {
    pub consecutive_failures: u32,
    pub last_update: Option<Instant>,
    pub last_success: bool,
    pub base_interval: Duration,
}

impl ScheduleState {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            last_update: None,
            last_success: false,
            base_interval,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_success = true;
        self.last_update = Some(Instant::now());
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_success = false;
        self.last_update = Some(Instant::now());
    }

    pub fn next_interval(&self, max_multiplier: u32) -> Duration {
        next_interval(self.base_interval, self.consecutive_failures, max_multiplier)
    }
}

struct Registered {
    task: Arc<dyn RefreshTask>,
    state: Arc<Mutex<ScheduleState>>,
    _worker: BackgroundWorker,
}

pub struct AdaptiveScheduler {
    max_multiplier: u32,
    tasks: DashMap<String, Registered>,
}

impl AdaptiveScheduler {
    pub const DEFAULT_MAX_MULTIPLIER: u32 = 8;

    pub fn new(max_multiplier: u32) -> Self {
        Self {
            max_multiplier: max_multiplier.max(1),
            tasks: DashMap::new(),
        }
    }

    /// Start refreshing `task` every `base_interval`, backing off on failure.
    /// Registering a name again replaces (and stops) the previous loop.
    pub fn register(&self, task: Arc<dyn RefreshTask>, base_interval: Duration) {
        let name = task.name().to_string();
        let state = Arc::new(Mutex::new(ScheduleState::new(base_interval)));
        let max_multiplier = self.max_multiplier;

        let worker = {
            let task = Arc::clone(&task);
            let state = Arc::clone(&state);
            let name = name.clone();
            BackgroundWorker::spawn(format!("refresh:{}", name), move |stop| async move {
                let mut interval = base_interval;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = sleep(interval) => {}
                    }

                    let outcome = task.refresh().await;
                    metrics::record_refresh(&name, outcome.is_ok());

                    {
                        let mut current = state.lock();
                        match outcome {
                            Ok(()) => {
                                if current.consecutive_failures > 0 {
                                    info!(resource = %name, "Refresh recovered");
                                }
                                current.record_success();
                                interval = current.next_interval(max_multiplier);
                            }
                            Err(e) => {
                                current.record_failure();
                                interval = current.next_interval(max_multiplier);
                                warn!(
                                    resource = %name,
                                    streak = current.consecutive_failures,
                                    next_interval = ?interval,
                                    error = %e,
                                    "Refresh failed, backing off"
                                );
                            }
                        }
                    }
                    metrics::set_refresh_interval(&name, interval);
                }
                debug!(resource = %name, "Refresh loop stopped");
            })
        };

        self.tasks.insert(name, Registered { task, state, _worker: worker });
    }

    /// One immediate refresh of `name`, outside the schedule. `false` if the
    /// refresh failed or no such task is registered.
    pub async fn handle_ready_event(&self, name: &str) -> bool {
        let Some(task) = self.tasks.get(name).map(|r| Arc::clone(&r.task)) else {
            debug!(resource = name, "Ready event for unknown resource");
            return false;
        };

        match task.refresh().await {
            Ok(()) => true,
            Err(e) => {
                warn!(resource = name, error = %e, "Ready-event refresh failed");
                false
            }
        }
    }

    pub fn state(&self, name: &str) -> Option<ScheduleState> {
        self.tasks.get(name).map(|r| r.state.lock().clone())
    }

    pub fn resources(&self) -> Vec<String> {
        self.tasks.iter().map(|r| r.key().clone()).collect()
    }

    /// Stop every loop. Pending timers are cancelled, not waited out.
    pub fn shutdown(&self) {
        let count = self.tasks.len();
        self.tasks.clear();
        if count > 0 {
            info!(count, "Refresh loops stopped");
        }
    }
}

impl Default for AdaptiveScheduler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_MULTIPLIER)
    }
}
