// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the shard sync layer.
//!
//! # Example
//!
//! ```
//! use shard_sync::ShardSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ShardSyncConfig::default();
//! assert_eq!(config.max_retries, 3);
//! assert_eq!(config.budget_poll_interval_ms, 100);
//!
//! // Override a few knobs
//! let config = ShardSyncConfig {
//!     max_retries: 5,
//!     init_timeout_secs: 15.0,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be a positive, finite number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("leaderboard_page_size must be within 1..=100 (got {0})")]
    PageSize(usize),
}

/// Configuration for the shard sync layer.
///
/// Every field has a default; deployments usually only touch the retry and
/// timeout knobs. Durations are plain seconds so the config can come from any
/// serde source.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardSyncConfig {
    /// Attempts per store operation (including the first)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    /// Ceiling for exponential backoff
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,

    /// Max time to wait for request quota before fast-failing
    #[serde(default = "default_budget_wait_timeout_secs")]
    pub budget_wait_timeout_secs: f64,

    /// How often the admission gate re-reads the remaining quota
    #[serde(default = "default_budget_poll_interval_ms")]
    pub budget_poll_interval_ms: u64,

    /// Staleness threshold for temporary cache entries
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: f64,

    /// Sweep frequency for temporary cache eviction
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: f64,

    /// Deadline for an entity's async initialization
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: f64,

    /// How long a finished init state stays around for diagnostics
    #[serde(default = "default_init_cleanup_grace_secs")]
    pub init_cleanup_grace_secs: f64,

    /// Pub/sub subscribe and publish attempts
    #[serde(default = "default_sync_max_retries")]
    pub sync_max_retries: u32,

    /// Linear pub/sub retry step (delay = step * attempt)
    #[serde(default = "default_sync_base_delay_secs")]
    pub sync_base_delay_secs: f64,

    /// Topic carrying statistic changes between shards
    #[serde(default = "default_stats_topic")]
    pub stats_topic: String,

    /// Cap on the scheduler's failure backoff multiplier
    #[serde(default = "default_scheduler_max_multiplier")]
    pub scheduler_max_multiplier: u32,

    /// Base refresh interval for leaderboards
    #[serde(default = "default_leaderboard_interval_secs")]
    pub leaderboard_interval_secs: f64,

    /// Rows per leaderboard read
    #[serde(default = "default_leaderboard_page_size")]
    pub leaderboard_page_size: usize,

    /// Periodic save of dirty session statistics (0 = disabled)
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: f64,

    /// Key prefix for entity payloads
    #[serde(default = "default_profile_key_prefix")]
    pub profile_key_prefix: String,

    /// Key prefix for statistics records
    #[serde(default = "default_stats_key_prefix")]
    pub stats_key_prefix: String,
}

fn default_max_retries() -> u32 { 3 }
fn default_base_delay_secs() -> f64 { 1.0 }
fn default_max_backoff_secs() -> f64 { 16.0 }
fn default_budget_wait_timeout_secs() -> f64 { 10.0 }
fn default_budget_poll_interval_ms() -> u64 { 100 }
fn default_cache_max_age_secs() -> f64 { 3600.0 } // 1 hour
fn default_cleanup_interval_secs() -> f64 { 600.0 } // 10 minutes
fn default_init_timeout_secs() -> f64 { 30.0 }
fn default_init_cleanup_grace_secs() -> f64 { 60.0 }
fn default_sync_max_retries() -> u32 { 3 }
fn default_sync_base_delay_secs() -> f64 { 1.0 }
fn default_stats_topic() -> String { "StatsSync".to_string() }
fn default_scheduler_max_multiplier() -> u32 { 8 }
fn default_leaderboard_interval_secs() -> f64 { 60.0 }
fn default_leaderboard_page_size() -> usize { 100 }
fn default_autosave_interval_secs() -> f64 { 120.0 }
fn default_profile_key_prefix() -> String { "Profile_".to_string() }
fn default_stats_key_prefix() -> String { "Stats_".to_string() }

impl Default for ShardSyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            budget_wait_timeout_secs: default_budget_wait_timeout_secs(),
            budget_poll_interval_ms: default_budget_poll_interval_ms(),
            cache_max_age_secs: default_cache_max_age_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            init_timeout_secs: default_init_timeout_secs(),
            init_cleanup_grace_secs: default_init_cleanup_grace_secs(),
            sync_max_retries: default_sync_max_retries(),
            sync_base_delay_secs: default_sync_base_delay_secs(),
            stats_topic: default_stats_topic(),
            scheduler_max_multiplier: default_scheduler_max_multiplier(),
            leaderboard_interval_secs: default_leaderboard_interval_secs(),
            leaderboard_page_size: default_leaderboard_page_size(),
            autosave_interval_secs: default_autosave_interval_secs(),
            profile_key_prefix: default_profile_key_prefix(),
            stats_key_prefix: default_stats_key_prefix(),
        }
    }
}

impl ShardSyncConfig {
    /// Check every numeric option. Call once at construction; the rest of the
    /// crate assumes a validated config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("base_delay_secs", self.base_delay_secs),
            ("max_backoff_secs", self.max_backoff_secs),
            ("budget_wait_timeout_secs", self.budget_wait_timeout_secs),
            ("cache_max_age_secs", self.cache_max_age_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("init_timeout_secs", self.init_timeout_secs),
            ("init_cleanup_grace_secs", self.init_cleanup_grace_secs),
            ("sync_base_delay_secs", self.sync_base_delay_secs),
            ("leaderboard_interval_secs", self.leaderboard_interval_secs),
        ];
        for (field, value) in durations {
            positive_secs(field, value)?;
        }
        // autosave may be disabled with 0
        if !(self.autosave_interval_secs.is_finite() && self.autosave_interval_secs >= 0.0) {
            return Err(ConfigError::InvalidDuration {
                field: "autosave_interval_secs",
                value: self.autosave_interval_secs,
            });
        }

        if self.max_retries == 0 {
            return Err(ConfigError::Zero { field: "max_retries" });
        }
        if self.sync_max_retries == 0 {
            return Err(ConfigError::Zero { field: "sync_max_retries" });
        }
        if self.budget_poll_interval_ms == 0 {
            return Err(ConfigError::Zero { field: "budget_poll_interval_ms" });
        }
        if self.scheduler_max_multiplier == 0 {
            return Err(ConfigError::Zero { field: "scheduler_max_multiplier" });
        }
        if !(1..=100).contains(&self.leaderboard_page_size) {
            return Err(ConfigError::PageSize(self.leaderboard_page_size));
        }
        Ok(())
    }

    pub fn budget_poll_interval(&self) -> Duration {
        Duration::from_millis(self.budget_poll_interval_ms)
    }

    pub fn cache_max_age(&self) -> Duration {
        secs(self.cache_max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        secs(self.cleanup_interval_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        secs(self.init_timeout_secs)
    }

    pub fn init_cleanup_grace(&self) -> Duration {
        secs(self.init_cleanup_grace_secs)
    }

    pub fn sync_base_delay(&self) -> Duration {
        secs(self.sync_base_delay_secs)
    }

    pub fn leaderboard_interval(&self) -> Duration {
        secs(self.leaderboard_interval_secs)
    }

    /// `None` when autosave is disabled.
    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_interval_secs > 0.0).then(|| secs(self.autosave_interval_secs))
    }
}

fn positive_secs(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
    } else {
        Err(ConfigError::InvalidDuration { field, value })
    }
}

/// Seconds → Duration for already-validated values. Out-of-range input maps to zero.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
