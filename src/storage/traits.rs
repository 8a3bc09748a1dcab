// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Update of '{key}' lost {attempts} compare-and-swap races")]
    Conflict { key: String, attempts: u32 },
    #[error("Value at '{key}' is not an integer")]
    NotNumeric { key: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Operation class the remote store budgets separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    Get,
    /// Shared by `set` and `increment`
    SetIncrement,
    Update,
    SortedRead,
}

impl RequestClass {
    pub const ALL: [RequestClass; 4] = [
        RequestClass::Get,
        RequestClass::SetIncrement,
        RequestClass::Update,
        RequestClass::SortedRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::SetIncrement => "set_increment",
            Self::Update => "update",
            Self::SortedRead => "sorted_read",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transform applied by [`RemoteStore::update`].
///
/// Receives the current value (`None` if absent) and returns the value to
/// store, or `None` to leave the key untouched. Stores may call it more than
/// once when a compare-and-swap loses a race, so it must be a pure data
/// function: no I/O, no blocking, no panics.
pub type UpdateTransform = Arc<dyn Fn(Option<Value>) -> Option<Value> + Send + Sync>;

/// One page request against the store's integer-valued keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedQuery {
    pub ascending: bool,
    pub page_size: usize,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl SortedQuery {
    pub const MAX_PAGE_SIZE: usize = 100;

    /// Highest values first.
    pub fn top(page_size: usize) -> Self {
        Self { ascending: false, page_size, min: None, max: None }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.page_size == 0 || self.page_size > Self::MAX_PAGE_SIZE {
            return Err(StorageError::InvalidRequest(format!(
                "page size must be within 1..={} (got {})",
                Self::MAX_PAGE_SIZE,
                self.page_size
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(StorageError::InvalidRequest(format!(
                    "min {} is greater than max {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    pub fn admits(&self, value: i64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedEntry {
    pub key: String,
    pub value: i64,
}

/// Reports how much request budget the remote store has left.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    async fn remaining_quota(&self, class: RequestClass) -> Result<u32, StorageError>;
}

/// A named key-value store behind a rate-limited RPC boundary.
///
/// `update` must be atomic at the store (compare-and-swap or equivalent) and
/// `increment` must be atomic. Any call may fail transiently; retry policy
/// lives in [`crate::ResilientStoreClient`], not here.
#[async_trait]
pub trait RemoteStore: QuotaSource {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Returns the value left in the store after the transform ran.
    async fn update(&self, key: &str, transform: UpdateTransform) -> Result<Option<Value>, StorageError>;

    /// Adds `delta` to an integer value (absent counts as 0), returning the new value.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError>;

    async fn sorted_read(&self, query: &SortedQuery) -> Result<Vec<SortedEntry>, StorageError>;
}
