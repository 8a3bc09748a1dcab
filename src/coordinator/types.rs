// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the shard coordinator.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::identity::OwnerHandle;
use crate::stats::record::StatKind;
use crate::storage::traits::{QuotaSource, RemoteStore};
use crate::sync::transport::PubSubTransport;

/// Coordinator lifecycle state.
///
/// Use [`super::ShardCoordinator::state()`] to check the current state or
/// [`super::ShardCoordinator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Just created, not yet started
    Created,
    /// Subscribing and starting background work
    Starting,
    /// Accepting sessions
    Running,
    /// Draining: saving everything, no new sessions
    ShuttingDown,
    /// All data flushed, bus disconnected
    Stopped,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Why a session cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    #[error("could not load data for {owner}: {reason}")]
    CacheLoad { owner: OwnerHandle, reason: String },

    #[error("initialization of {owner} did not finish within {after:?}")]
    InitTimeout { owner: OwnerHandle, after: Duration },

    #[error("coordinator is {0}, not accepting sessions")]
    NotRunning(CoordinatorState),
}

/// Lifecycle misuse (starting twice, starting after shutdown).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: CoordinatorState },
}

/// Ends sessions that cannot continue (kick, disconnect). Implemented by the
/// embedding server.
pub trait SessionTerminator: Send + Sync {
    fn terminate(&self, owner: OwnerHandle, failure: &SessionFailure);
}

/// Stores and transport the coordinator runs against.
#[derive(Clone)]
pub struct CoordinatorBackends {
    /// Entity payloads (profiles)
    pub profiles: Arc<dyn RemoteStore>,
    /// Statistics records
    pub stats: Arc<dyn RemoteStore>,
    /// Budget shared by every store above
    pub quota: Arc<dyn QuotaSource>,
    pub transport: Arc<dyn PubSubTransport>,
    /// Ordered per-stat stores, mirrored on save
    pub leaderboards: Vec<(StatKind, Arc<dyn RemoteStore>)>,
}
