// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity identities.
//!
//! Two kinds of identity flow through the crate:
//!
//! - [`EntityId`] is the stable, cross-process identity of an entity (a player
//!   account). It is valid whether or not the entity is connected here, and it
//!   is what goes over the wire and into store keys.
//! - [`OwnerHandle`] is this process's live handle to a connected entity. It is
//!   only meaningful while the session lasts; a reconnect gets a new handle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of an entity, usable across processes.
///
/// Well-formed identities are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Returns `None` for the reserved zero identity.
    #[must_use]
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Store key for this entity under `prefix` (e.g. `"Stats_"` → `"Stats_42"`).
    #[must_use]
    pub fn key(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }

    /// Inverse of [`key`](Self::key). Used when reading sorted stores back.
    #[must_use]
    pub fn from_key(key: &str, prefix: &str) -> Option<Self> {
        key.strip_prefix(prefix)
            .and_then(|rest| rest.parse::<u64>().ok())
            .and_then(Self::new)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local handle to a connected entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle {
    session: u64,
    entity: EntityId,
}

impl OwnerHandle {
    #[must_use]
    pub fn new(session: u64, entity: EntityId) -> Self {
        Self { session, entity }
    }

    /// Session number assigned by the embedding process.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    #[must_use]
    pub fn entity(&self) -> EntityId {
        self.entity
    }
}

impl fmt::Display for OwnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.session)
    }
}
