// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background task handle with explicit, race-free cancellation.
//!
//! Dropping a [`BackgroundWorker`] cancels and aborts the task, so a sweeper or
//! refresh loop never outlives the component that started it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct BackgroundWorker {
    name: String,
    stop: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawn `task`, handing it the token it must watch for cancellation.
    pub fn spawn<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let join_handle = tokio::spawn(task(stop.clone()));
        Self {
            name: name.into(),
            stop,
            join_handle: Some(join_handle),
        }
    }

    /// Run `tick` every `interval` (first run one interval after spawn) until stopped.
    pub fn periodic<F, Fut>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        Self::spawn(name, move |stop| async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        debug!(worker = %task_name, "Background worker stopped");
                        break;
                    }
                    _ = sleep(interval) => tick().await,
                }
            }
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the task to stop and wait for it to finish its current iteration.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            if let Err(err) = join_handle.await {
                debug!(worker = %self.name, error = %err, "Background worker ended abnormally");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
