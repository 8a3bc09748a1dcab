// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process remote store.
//!
//! Behaves like the real store as far as the rest of the crate can tell:
//! atomic `update`/`increment`, sorted reads over integer values, and an
//! optional per-class request budget that every call draws from. Budgets are
//! refilled explicitly with [`InMemoryStore::set_quota`], which is what tests
//! use to model a store that is (or never becomes) overloaded.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::traits::{
    QuotaSource, RemoteStore, RequestClass, SortedEntry, SortedQuery, StorageError, UpdateTransform,
};

pub struct InMemoryStore {
    name: String,
    data: DashMap<String, Value>,
    /// Remaining budget per class. Absent = unlimited.
    quotas: DashMap<RequestClass, u32>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: DashMap::new(),
            quotas: DashMap::new(),
        }
    }

    /// Limit `class` to `remaining` further requests (until set again).
    pub fn set_quota(&self, class: RequestClass, remaining: u32) {
        self.quotas.insert(class, remaining);
    }

    /// Drop any limit on `class`.
    pub fn clear_quota(&self, class: RequestClass) {
        self.quotas.remove(&class);
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read a value without touching the budget.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|r| r.value().clone())
    }

    /// Write a value without touching the budget.
    pub fn seed(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Clear all items
    pub fn clear(&self) {
        self.data.clear();
    }

    fn consume(&self, class: RequestClass) {
        if let Some(mut remaining) = self.quotas.get_mut(&class) {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

#[async_trait]
impl QuotaSource for InMemoryStore {
    async fn remaining_quota(&self, class: RequestClass) -> Result<u32, StorageError> {
        Ok(self.quotas.get(&class).map_or(u32::MAX, |r| *r.value()))
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.consume(RequestClass::Get);
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.consume(RequestClass::SetIncrement);
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn update(&self, key: &str, transform: UpdateTransform) -> Result<Option<Value>, StorageError> {
        self.consume(RequestClass::Update);
        // The entry guard holds the shard lock for the duration of the
        // transform, which is what makes this a compare-and-swap.
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match transform(Some(occupied.get().clone())) {
                Some(next) => {
                    occupied.insert(next.clone());
                    Ok(Some(next))
                }
                None => Ok(Some(occupied.get().clone())),
            },
            Entry::Vacant(vacant) => match transform(None) {
                Some(next) => {
                    vacant.insert(next.clone());
                    Ok(Some(next))
                }
                None => Ok(None),
            },
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        self.consume(RequestClass::SetIncrement);
        let mut slot = self.data.entry(key.to_string()).or_insert(Value::from(0));
        let current = slot.as_i64().ok_or_else(|| StorageError::NotNumeric { key: key.to_string() })?;
        let next = current.saturating_add(delta);
        *slot = Value::from(next);
        Ok(next)
    }

    async fn sorted_read(&self, query: &SortedQuery) -> Result<Vec<SortedEntry>, StorageError> {
        query.validate()?;
        self.consume(RequestClass::SortedRead);

        let mut entries: Vec<SortedEntry> = self
            .data
            .iter()
            .filter_map(|r| {
                r.value().as_i64().map(|value| SortedEntry { key: r.key().clone(), value })
            })
            .filter(|entry| query.admits(entry.value))
            .collect();

        entries.sort_by(|a, b| {
            let by_value = if query.ascending { a.value.cmp(&b.value) } else { b.value.cmp(&a.value) };
            by_value.then_with(|| a.key.cmp(&b.key))
        });
        entries.truncate(query.page_size);
        Ok(entries)
    }
}
