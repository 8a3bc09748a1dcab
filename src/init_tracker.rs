// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity initialization tracking with cancellable timeouts.
//!
//! An entity's join runs several async steps (payload load, statistics load,
//! display setup). The tracker holds one [`InitState`] per entity, arms a
//! timeout for it, and keeps finished states around for a grace period so they
//! can still be inspected.
//!
//! # Races
//!
//! Completion is decided exactly once under the state's lock. If the timeout
//! wins, the state is marked failed with [`InitError::TimedOut`] before the
//! timeout callback runs, and the work that finishes afterwards sees
//! [`InitTracker::complete`] return `false`. If the work wins, the timeout
//! task is cancelled and never calls back.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::identity::EntityId;
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("initialization timed out after {0:?}")]
    TimedOut(Duration),
    #[error("initialization failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default)]
struct Outcome {
    completed: bool,
    success: bool,
    error: Option<InitError>,
}

#[derive(Debug)]
pub struct InitState {
    entity: EntityId,
    started_at: Instant,
    outcome: Mutex<Outcome>,
    timeout: CancellationToken,
}

impl InitState {
    fn new(entity: EntityId, timeout: CancellationToken) -> Self {
        Self {
            entity,
            started_at: Instant::now(),
            outcome: Mutex::new(Outcome::default()),
            timeout,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.lock().completed
    }

    pub fn is_success(&self) -> bool {
        self.outcome.lock().success
    }

    pub fn error(&self) -> Option<InitError> {
        self.outcome.lock().error.clone()
    }

    /// First caller wins; later calls change nothing and return `false`.
    fn finish(&self, success: bool, error: Option<InitError>) -> bool {
        let mut outcome = self.outcome.lock();
        if outcome.completed {
            return false;
        }
        *outcome = Outcome { completed: true, success, error };
        true
    }
}

pub struct InitTracker {
    states: Arc<DashMap<EntityId, Arc<InitState>>>,
    shutdown: CancellationToken,
}

impl InitTracker {
    pub fn new() -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start tracking `entity`. Replaces any earlier state for it; that
    /// earlier work carries on independently with its own state.
    pub fn create(&self, entity: EntityId) -> Arc<InitState> {
        let state = Arc::new(InitState::new(entity, self.shutdown.child_token()));
        if let Some(previous) = self.states.insert(entity, Arc::clone(&state)) {
            if !previous.is_completed() {
                debug!(entity = %entity, "Replacing in-flight init state");
            }
        }
        state
    }

    pub fn get(&self, entity: EntityId) -> Option<Arc<InitState>> {
        self.states.get(&entity).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// States still waiting on their work.
    pub fn pending(&self) -> usize {
        self.states.iter().filter(|r| !r.value().is_completed()).count()
    }

    /// Arm a deadline. If `state` is still incomplete after `timeout`, it is
    /// marked timed out and `on_timeout` runs once.
    pub fn schedule_timeout<F>(&self, state: &Arc<InitState>, timeout: Duration, on_timeout: F)
    where
        F: FnOnce(Arc<InitState>) + Send + 'static,
    {
        let state = Arc::clone(state);
        let cancelled = state.timeout.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = sleep(timeout) => {
                    if state.finish(false, Some(InitError::TimedOut(timeout))) {
                        warn!(entity = %state.entity, timeout = ?timeout, "Entity initialization timed out");
                        metrics::record_init_outcome("timed_out");
                        on_timeout(state);
                    }
                }
            }
        });
    }

    /// Record the outcome and disarm the timeout. Returns `false` if the state
    /// was already complete (including by timeout).
    pub fn complete(&self, state: &InitState, success: bool, error: Option<InitError>) -> bool {
        let first = state.finish(success, error);
        if first {
            state.timeout.cancel();
            metrics::record_init_outcome(if success { "completed" } else { "failed" });
            debug!(entity = %state.entity, success, elapsed = ?state.elapsed(), "Entity initialization finished");
        }
        first
    }

    /// Forget the current state for `entity` after `delay`, unless it has been
    /// replaced by a newer one in the meantime.
    pub fn schedule_cleanup(&self, entity: EntityId, delay: Duration) {
        let Some(scheduled) = self.get(entity) else {
            return;
        };
        let states = Arc::clone(&self.states);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(delay) => {
                    states.remove_if(&entity, |_, current| Arc::ptr_eq(current, &scheduled));
                }
            }
        });
    }

    /// Disarm every pending timeout and cleanup. Used at shutdown.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }
}

impl Default for InitTracker {
    fn default() -> Self {
        Self::new()
    }
}
