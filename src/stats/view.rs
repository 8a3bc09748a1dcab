// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local view of statistics for entities in session on this shard.
//!
//! Local writes bump a per-entity version and mark it dirty; remote updates
//! from the sync bus are merged in without marking dirty, since they already
//! live in the store. Both paths use the same max-merge as the store, so the
//! order in which local and remote values arrive does not matter.
//!
//! An entity that leaves with unsaved writes is parked: its record stays in
//! [`SessionStats::dirty`] and [`SessionStats::snapshot`] until a save goes
//! through, and a rejoin picks it back up.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::record::{StatKind, StatisticsRecord};
use crate::identity::EntityId;

/// Where visible stat values are shown (scoreboard, overhead display).
pub trait StatDisplay: Send + Sync {
    fn refresh(&self, entity: EntityId, stat: StatKind, value: u64);
}

#[derive(Debug, Clone)]
struct SessionEntry {
    record: StatisticsRecord,
    version: u64,
    saved_version: u64,
}

/// Pending write-back for one entity. Hand `version` to
/// [`SessionStats::mark_saved`] once the record is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyRecord {
    pub entity: EntityId,
    pub record: StatisticsRecord,
    pub version: u64,
}

pub struct SessionStats {
    entries: DashMap<EntityId, SessionEntry>,
    departed: DashMap<EntityId, DirtyRecord>,
    display: Option<Arc<dyn StatDisplay>>,
}

impl SessionStats {
    pub fn new(display: Option<Arc<dyn StatDisplay>>) -> Self {
        Self {
            entries: DashMap::new(),
            departed: DashMap::new(),
            display,
        }
    }

    fn show(&self, entity: EntityId, stat: StatKind, value: u64) {
        if let Some(display) = &self.display {
            display.refresh(entity, stat, value);
        }
    }

    /// Add an entity with its loaded record. If it is already present the two
    /// are merged, so remote updates seen during the load are kept.
    pub fn join(&self, entity: EntityId, loaded: StatisticsRecord) {
        let record = {
            let mut entry = self.entries.entry(entity).or_insert_with(|| SessionEntry {
                record: StatisticsRecord::new(),
                version: 0,
                saved_version: 0,
            });
            entry.record.merge_max(&loaded);
            if let Some((_, parked)) = self.departed.remove(&entity) {
                entry.record.merge_max(&parked.record);
                entry.version += 1;
            }
            entry.record.clone()
        };
        for (stat, value) in record.iter() {
            self.show(entity, stat, value);
        }
    }

    /// Remove an entity. Unsaved writes are parked and returned; `None`
    /// means everything it wrote is already stored.
    pub fn leave(&self, entity: EntityId) -> Option<DirtyRecord> {
        let (_, entry) = self.entries.remove(&entity)?;
        if entry.version <= entry.saved_version {
            return None;
        }
        let pending = DirtyRecord {
            entity,
            record: entry.record,
            version: entry.version,
        };
        self.departed
            .entry(entity)
            .and_modify(|parked| {
                parked.record.merge_max(&pending.record);
                parked.version = parked.version.max(pending.version);
            })
            .or_insert_with(|| pending.clone());
        debug!(entity = %entity, "Parked unsaved statistics of departed entity");
        Some(pending)
    }

    /// Unsaved writes of an entity in session.
    pub fn pending(&self, entity: EntityId) -> Option<DirtyRecord> {
        self.entries
            .get(&entity)
            .filter(|e| e.version > e.saved_version)
            .map(|e| DirtyRecord {
                entity,
                record: e.record.clone(),
                version: e.version,
            })
    }

    /// Departed entities whose statistics are not yet stored.
    pub fn departed(&self) -> Vec<EntityId> {
        self.departed.iter().map(|e| *e.key()).collect()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entries.contains_key(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<StatisticsRecord> {
        self.entries.get(&entity).map(|e| e.record.clone())
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local write. Returns `false` if the entity is not in session or the
    /// value does not raise the stat.
    pub fn record_local(&self, entity: EntityId, stat: StatKind, value: u64) -> bool {
        let changed = match self.entries.get_mut(&entity) {
            Some(mut entry) => {
                let changed = entry.record.merge_stat(stat, value);
                if changed {
                    entry.version += 1;
                }
                changed
            }
            None => {
                debug!(entity = %entity, stat = %stat, "Local stat write for entity not in session");
                return false;
            }
        };
        if changed {
            self.show(entity, stat, value);
        }
        changed
    }

    /// Update arriving from another shard. Only entities in session are
    /// tracked; returns whether the visible value changed.
    pub fn apply_remote(&self, entity: EntityId, stat: StatKind, value: u64) -> bool {
        let changed = self
            .entries
            .get_mut(&entity)
            .is_some_and(|mut entry| entry.record.merge_stat(stat, value));
        if changed {
            self.show(entity, stat, value);
        }
        changed
    }

    /// Entities with local writes not yet saved.
    pub fn dirty(&self) -> Vec<DirtyRecord> {
        self.entries
            .iter()
            .filter(|e| e.version > e.saved_version)
            .map(|e| DirtyRecord {
                entity: *e.key(),
                record: e.record.clone(),
                version: e.version,
            })
            .chain(self.departed.iter().map(|e| e.value().clone()))
            .collect()
    }

    pub fn is_dirty(&self, entity: EntityId) -> bool {
        self.entries.get(&entity).is_some_and(|e| e.version > e.saved_version)
    }

    /// Everything in session, dirty or not, plus parked records (shutdown flush).
    pub fn snapshot(&self) -> Vec<DirtyRecord> {
        self.entries
            .iter()
            .map(|e| DirtyRecord {
                entity: *e.key(),
                record: e.record.clone(),
                version: e.version,
            })
            .chain(self.departed.iter().map(|e| e.value().clone()))
            .collect()
    }

    /// Mark `version` as stored. Writes made after that snapshot stay dirty.
    pub fn mark_saved(&self, entity: EntityId, version: u64) {
        if let Some(mut entry) = self.entries.get_mut(&entity) {
            entry.saved_version = entry.saved_version.max(version);
            return;
        }
        self.departed.remove_if(&entity, |_, parked| parked.version <= version);
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new(None)
    }
}
