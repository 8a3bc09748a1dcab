// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity cache.
//!
//! Two maps over the same store:
//!
//! ```text
//! durable    OwnerHandle → payload   connected entities; removed on unload
//! temporary  EntityId    → payload   entities owned elsewhere; removed by sweep
//! ```
//!
//! Durable entries are the session's working copy. They are written back with
//! [`EntityCache::save`] and never expire while the owner is connected.
//! Temporary entries are read-only lookups of remote entities and are refetched
//! once older than `max_age`.
//!
//! Callers must `load` an owner before `get`/`modify`. A missing durable entry
//! is a usage bug and surfaces as [`CacheError::NotLoaded`].
//!
//! [`EntityCache::release`] unloads an owner only once its payload is stored.
//! If the save fails the entry is kept as departed, retried by
//! [`EntityCache::retry_departed`] and the shutdown flush, and handed to the
//! entity's next owner if it reconnects first.

use dashmap::DashSet;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::ttl_cache::{CacheStats, TtlCache};
use super::{CacheError, CachePayload};
use crate::identity::{EntityId, OwnerHandle};
use crate::resilience::client::ResilientStoreClient;
use crate::storage::traits::RemoteStore;
use crate::worker::BackgroundWorker;

pub struct EntityCache<V> {
    client: Arc<ResilientStoreClient>,
    store: Arc<dyn RemoteStore>,
    key_prefix: String,
    max_age: Duration,
    durable: TtlCache<OwnerHandle, V>,
    temporary: Arc<TtlCache<EntityId, V>>,
    departed: DashSet<OwnerHandle>,
    adopted: DashSet<OwnerHandle>,
    sweeper: Mutex<Option<BackgroundWorker>>,
}

impl<V: CachePayload> EntityCache<V> {
    /// `key_prefix` maps an entity to its store key (`"Profile_"` → `Profile_42`).
    /// `max_age` is the staleness threshold for temporary entries.
    pub fn new(
        client: Arc<ResilientStoreClient>,
        store: Arc<dyn RemoteStore>,
        key_prefix: impl Into<String>,
        max_age: Duration,
    ) -> Self {
        Self {
            client,
            store,
            key_prefix: key_prefix.into(),
            max_age,
            durable: TtlCache::new("entity_durable"),
            temporary: Arc::new(TtlCache::new("entity_temporary")),
            departed: DashSet::new(),
            adopted: DashSet::new(),
            sweeper: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    async fn fetch(&self, entity: EntityId) -> Result<V, CacheError> {
        let key = entity.key(&self.key_prefix);
        let stored = self
            .client
            .get(self.store.as_ref(), &key)
            .await
            .into_result()
            .map_err(|source| CacheError::Load { entity, source })?;

        match stored {
            // never saved: start from the default payload
            None => Ok(V::default()),
            Some(value) => serde_json::from_value(value).map_err(|source| CacheError::Decode { entity, source }),
        }
    }

    /// Make sure `owner` has a durable entry. A hit only bumps `last_accessed`.
    ///
    /// An error means the owner cannot be initialized; callers end its session.
    pub async fn load(&self, owner: OwnerHandle) -> Result<(), CacheError> {
        if self.durable.touch(&owner) {
            return Ok(());
        }
        if let Some(payload) = self.adopt_departed(owner.entity()) {
            self.durable.insert(owner, owner.entity(), payload);
            self.adopted.insert(owner);
            debug!(owner = %owner, "Took over unsaved payload of previous session");
            return Ok(());
        }

        let payload = self.fetch(owner.entity()).await?;
        self.durable.insert(owner, owner.entity(), payload);
        debug!(owner = %owner, "Loaded entity payload");
        Ok(())
    }

    /// Payload of an entity that is not connected here. Stale entries are
    /// refetched; `None` if the fetch fails.
    pub async fn load_temporary(&self, entity: EntityId) -> Option<V> {
        if let Some(payload) = self.temporary.get_fresh(&entity, self.max_age) {
            return Some(payload);
        }

        match self.fetch(entity).await {
            Ok(payload) => {
                self.temporary.insert(entity, entity, payload.clone());
                Some(payload)
            }
            Err(e) => {
                warn!(entity = %entity, error = %e, "Temporary load failed");
                None
            }
        }
    }

    /// Copy of the durable payload.
    pub fn get(&self, owner: OwnerHandle) -> Result<V, CacheError> {
        self.durable.get(&owner).ok_or_else(|| {
            error!(owner = %owner, "Payload requested before load");
            CacheError::NotLoaded(owner)
        })
    }

    #[must_use]
    pub fn is_loaded(&self, owner: OwnerHandle) -> bool {
        self.durable.contains(&owner)
    }

    /// Apply `f` to a copy of the payload and swap the result in.
    pub fn modify<F>(&self, owner: OwnerHandle, f: F) -> Result<V, CacheError>
    where
        F: FnOnce(&mut V),
    {
        self.durable
            .replace_with(&owner, |mut payload| {
                f(&mut payload);
                payload
            })
            .ok_or(CacheError::NotLoaded(owner))
    }

    /// Drop the durable entry without saving it.
    pub fn unload(&self, owner: OwnerHandle) -> Option<V> {
        self.departed.remove(&owner);
        self.adopted.remove(&owner);
        self.durable.remove(&owner)
    }

    /// Drop the entry of a session that never started. A payload taken over
    /// from a departed owner is kept as departed instead.
    pub fn abandon(&self, owner: OwnerHandle) {
        if self.adopted.remove(&owner).is_some() {
            self.departed.insert(owner);
        } else {
            self.durable.remove(&owner);
        }
    }

    /// Save and unload `owner`. On a failed save the entry stays as departed
    /// and `false` is returned. An owner that is not loaded counts as released.
    pub async fn release(&self, owner: OwnerHandle) -> bool {
        if !self.durable.contains(&owner) {
            self.departed.remove(&owner);
            return true;
        }
        if self.save(owner).await {
            self.unload(owner);
            true
        } else {
            self.departed.insert(owner);
            warn!(owner = %owner, "Keeping payload of departed owner until it is saved");
            false
        }
    }

    /// Retry [`release`](Self::release) for every departed owner.
    /// Returns (released, still departed).
    pub async fn retry_departed(&self) -> (usize, usize) {
        let owners: Vec<OwnerHandle> = self.departed.iter().map(|o| *o).collect();
        let mut released = 0;
        for owner in owners {
            if self.release(owner).await {
                released += 1;
            }
        }
        (released, self.departed.len())
    }

    pub fn departed(&self) -> Vec<OwnerHandle> {
        self.departed.iter().map(|o| *o).collect()
    }

    fn adopt_departed(&self, entity: EntityId) -> Option<V> {
        let previous = self.departed.iter().map(|o| *o).find(|o| o.entity() == entity)?;
        self.departed.remove(&previous);
        self.durable.remove(&previous)
    }

    /// Write the durable payload back to the store.
    pub async fn save(&self, owner: OwnerHandle) -> bool {
        let Some(payload) = self.durable.get(&owner) else {
            warn!(owner = %owner, "Save requested for an owner that is not loaded");
            return false;
        };

        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                error!(owner = %owner, error = %e, "Payload failed to serialize");
                return false;
            }
        };

        let key = owner.entity().key(&self.key_prefix);
        let result = self.client.set(self.store.as_ref(), &key, value).await;
        if !result.success {
            warn!(owner = %owner, error = ?result.error, "Payload save failed");
        }
        result.success
    }

    /// Save every durable entry. Returns how many saves succeeded.
    pub async fn flush_all(&self) -> usize {
        let owners = self.durable.keys();
        let total = owners.len();
        let saved = join_all(owners.into_iter().map(|owner| self.save(owner)))
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        if saved < total {
            warn!(saved, total, "Some payloads were not flushed");
        } else {
            info!(saved, "Flushed all payloads");
        }
        saved
    }

    /// Drop temporary entries loaded more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let evicted = self.temporary.sweep(max_age);
        if evicted > 0 {
            debug!(evicted, "Swept stale temporary entries");
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) every `interval`. Replaces any running sweeper.
    pub fn start_sweeper(&self, interval: Duration, max_age: Duration) {
        let temporary = Arc::clone(&self.temporary);
        let worker = BackgroundWorker::periodic("cache_sweeper", interval, move || {
            let temporary = Arc::clone(&temporary);
            async move {
                let evicted = temporary.sweep(max_age);
                if evicted > 0 {
                    debug!(evicted, "Swept stale temporary entries");
                }
            }
        });
        *self.sweeper.lock() = Some(worker);
    }

    pub async fn stop_sweeper(&self) {
        let worker = self.sweeper.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Empty both maps. Flush first; unsaved changes are lost.
    pub fn clear(&self) {
        self.departed.clear();
        self.adopted.clear();
        self.durable.clear();
        self.temporary.clear();
    }

    pub fn owners(&self) -> Vec<OwnerHandle> {
        self.durable.keys()
    }

    pub fn durable_stats(&self) -> CacheStats {
        self.durable.stats()
    }

    pub fn temporary_stats(&self) -> CacheStats {
        self.temporary.stats()
    }
}
