// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory entity caching.
//!
//! - [`ttl_cache`]: generic map of immutable, timestamped entries
//! - [`entity_cache`]: per-owner durable map plus a temporary per-identity map,
//!   both filled through the resilient store client

pub mod ttl_cache;
pub mod entity_cache;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::identity::{EntityId, OwnerHandle};
use crate::resilience::retry::OperationError;

pub use entity_cache::EntityCache;
pub use ttl_cache::{CacheEntry, CacheStats, TtlCache};

/// Anything an [`EntityCache`] can hold. Entities that have never been saved
/// start from `Default`.
pub trait CachePayload: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CachePayload for T where T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

#[derive(Debug, Error)]
pub enum CacheError {
    /// `get`/`modify` before `load`. A usage bug in the caller.
    #[error("No cached payload for {0}; load it first")]
    NotLoaded(OwnerHandle),

    #[error("Failed to load {entity}: {source}")]
    Load {
        entity: EntityId,
        #[source]
        source: OperationError,
    },

    #[error("Stored payload for {entity} is malformed: {source}")]
    Decode {
        entity: EntityId,
        #[source]
        source: serde_json::Error,
    },
}
