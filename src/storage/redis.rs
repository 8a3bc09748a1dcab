// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed remote store.
//!
//! Layout for a store named `stats` with prefix `game:`:
//!
//! ```text
//! game:stats:{key}                 JSON-encoded value
//! game:stats:__sorted              ZSET mirror of every integer value (for sorted reads)
//! game:__budget:{class}:{minute}   fixed-window request counter, shared by all shards
//! ```
//!
//! `update` is an optimistic compare-and-swap: read the raw value, run the
//! transform locally, then write only if the raw value is still the same
//! (checked server-side by a Lua script). A lost race re-reads and retries a
//! bounded number of times before surfacing [`StorageError::Conflict`].
//!
//! The request budget is a one-minute fixed window per class. Each call counts
//! against it and [`QuotaSource::remaining_quota`] reports `limit - used`, so
//! every shard pointed at the same Redis sees the same budget.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::traits::{
    QuotaSource, RemoteStore, RequestClass, SortedEntry, SortedQuery, StorageError, UpdateTransform,
};
use crate::resilience::retry::{retry, RetryPolicy};

/// Marker the CAS script uses for "key did not exist when read".
const ABSENT: &str = "\u{0}absent";

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then current = ARGV[1] end
if current ~= ARGV[2] then return 0 end
redis.call('SET', KEYS[1], ARGV[3])
if ARGV[4] ~= '' then
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[5])
else
  redis.call('ZREM', KEYS[2], ARGV[5])
end
return 1
"#;

/// Compare-and-swap rounds before an update gives up.
const MAX_CAS_ATTEMPTS: u32 = 8;

const BUDGET_WINDOW_SECS: u64 = 60;

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
    name: String,
    /// Optional key prefix for namespacing (e.g., "game:" → "game:stats:Stats_1")
    prefix: String,
    /// Requests per class per minute
    budget_per_minute: u32,
    cas: Script,
}

impl RedisStore {
    /// Connect with the startup retry policy (fast-fail on bad config).
    pub async fn connect(
        connection_string: &str,
        name: &str,
        prefix: Option<&str>,
        budget_per_minute: u32,
    ) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)?;
        let connection = retry("redis_connect", &RetryPolicy::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await?;

        Ok(Self::from_connection(connection, name, prefix, budget_per_minute))
    }

    /// Build on an existing connection (several stores can share one).
    pub fn from_connection(
        connection: ConnectionManager,
        name: &str,
        prefix: Option<&str>,
        budget_per_minute: u32,
    ) -> Self {
        Self {
            connection,
            name: name.to_string(),
            prefix: prefix.unwrap_or("").to_string(),
            budget_per_minute,
            cas: Script::new(CAS_SCRIPT),
        }
    }

    /// Get a clone of the connection manager (for sharing with other stores)
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    #[inline]
    fn value_key(&self, key: &str) -> String {
        format!("{}{}:{}", self.prefix, self.name, key)
    }

    #[inline]
    fn sorted_key(&self) -> String {
        format!("{}{}:__sorted", self.prefix, self.name)
    }

    fn budget_key(&self, class: RequestClass) -> String {
        let window = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() / BUDGET_WINDOW_SECS)
            .unwrap_or(0);
        format!("{}__budget:{}:{}", self.prefix, class.as_str(), window)
    }

    async fn consume(&self, class: RequestClass) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let key = self.budget_key(class);
        let () = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .ignore()
            .expire(&key, (BUDGET_WINDOW_SECS * 2) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn encode(value: &Value) -> Result<String, StorageError> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(raw: Option<String>) -> Result<Option<Value>, StorageError> {
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(StorageError::from)
    }
}

#[async_trait]
impl QuotaSource for RedisStore {
    async fn remaining_quota(&self, class: RequestClass) -> Result<u32, StorageError> {
        let mut conn = self.connection.clone();
        let used: Option<u64> = conn.get(self.budget_key(class)).await?;
        let used = u32::try_from(used.unwrap_or(0)).unwrap_or(u32::MAX);
        Ok(self.budget_per_minute.saturating_sub(used))
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.consume(RequestClass::Get).await?;
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(self.value_key(key)).await?;
        Self::decode(raw)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.consume(RequestClass::SetIncrement).await?;
        let mut conn = self.connection.clone();
        let encoded = Self::encode(&value)?;

        let mut pipe = redis::pipe();
        pipe.atomic().set(self.value_key(key), encoded).ignore();
        match value.as_i64() {
            Some(n) => pipe.zadd(self.sorted_key(), key, n).ignore(),
            None => pipe.zrem(self.sorted_key(), key).ignore(),
        };
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn update(&self, key: &str, transform: UpdateTransform) -> Result<Option<Value>, StorageError> {
        self.consume(RequestClass::Update).await?;
        let mut conn = self.connection.clone();
        let value_key = self.value_key(key);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let raw: Option<String> = conn.get(&value_key).await?;
            let current = Self::decode(raw.clone())?;

            let Some(next) = transform(current.clone()) else {
                return Ok(current);
            };
            let encoded = Self::encode(&next)?;
            let score = next.as_i64().map(|n| n.to_string()).unwrap_or_default();

            let swapped: i32 = self
                .cas
                .key(&value_key)
                .key(self.sorted_key())
                .arg(ABSENT)
                .arg(raw.as_deref().unwrap_or(ABSENT))
                .arg(&encoded)
                .arg(&score)
                .arg(key)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(Some(next));
            }
            debug!(store = %self.name, key, attempt, "Compare-and-swap lost a race, re-reading");
        }

        Err(StorageError::Conflict { key: key.to_string(), attempts: MAX_CAS_ATTEMPTS })
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        self.consume(RequestClass::SetIncrement).await?;
        let mut conn = self.connection.clone();
        // INCRBY on a JSON integer works because the encoding is the bare number.
        let next: i64 = conn
            .incr(self.value_key(key), delta)
            .await
            .map_err(|e| match e.kind() {
                redis::ErrorKind::ResponseError => StorageError::NotNumeric { key: key.to_string() },
                _ => StorageError::from(e),
            })?;
        let () = conn.zadd(self.sorted_key(), key, next).await?;
        Ok(next)
    }

    async fn sorted_read(&self, query: &SortedQuery) -> Result<Vec<SortedEntry>, StorageError> {
        query.validate()?;
        self.consume(RequestClass::SortedRead).await?;
        let mut conn = self.connection.clone();

        let min = query.min.map_or_else(|| "-inf".to_string(), |n| n.to_string());
        let max = query.max.map_or_else(|| "+inf".to_string(), |n| n.to_string());
        let count = query.page_size as isize;

        let rows: Vec<(String, f64)> = if query.ascending {
            conn.zrangebyscore_limit_withscores(self.sorted_key(), min, max, 0, count).await?
        } else {
            conn.zrevrangebyscore_limit_withscores(self.sorted_key(), max, min, 0, count).await?
        };

        Ok(rows
            .into_iter()
            .map(|(key, score)| SortedEntry { key, value: score as i64 })
            .collect())
    }
}
