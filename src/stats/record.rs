// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statistics records and the max-merge rule.
//!
//! Every writer, local or remote, combines records field by field with `max`.
//! That makes a merge commutative, associative, and idempotent, so concurrent
//! shards can save and re-deliver the same values in any order and still
//! converge. The price is that a stat can never go down through this path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::storage::traits::UpdateTransform;

/// The fixed set of tracked statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatKind {
    Donated,
    Raised,
    Visits,
}

impl StatKind {
    pub const ALL: [StatKind; 3] = [StatKind::Donated, StatKind::Raised, StatKind::Visits];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donated => "Donated",
            Self::Raised => "Raised",
            Self::Visits => "Visits",
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Interpret a JSON value as a stat value.
///
/// Accepts non-negative integers and finite non-negative floats (floored).
/// Anything else, including negative numbers, is rejected.
pub fn parse_stat_value(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 {
        Some(f.floor() as u64)
    } else {
        None
    }
}

/// Stat name → value. Absent stats read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsRecord(BTreeMap<StatKind, u64>);

impl StatisticsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stat present, all zero. What a failed or empty load yields.
    pub fn zeroed() -> Self {
        Self(StatKind::ALL.into_iter().map(|kind| (kind, 0)).collect())
    }

    pub fn with(mut self, kind: StatKind, value: u64) -> Self {
        self.0.insert(kind, value);
        self
    }

    pub fn get(&self, kind: StatKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn contains(&self, kind: StatKind) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StatKind, u64)> + '_ {
        self.0.iter().map(|(kind, value)| (*kind, *value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raise `kind` to `value` if that is higher. Returns whether it changed.
    pub fn merge_stat(&mut self, kind: StatKind, value: u64) -> bool {
        match self.0.get_mut(&kind) {
            Some(current) if *current >= value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.0.insert(kind, value);
                true
            }
        }
    }

    /// Field-wise max with `other`. Returns whether anything changed.
    pub fn merge_max(&mut self, other: &StatisticsRecord) -> bool {
        let mut changed = false;
        for (kind, value) in other.iter() {
            changed |= self.merge_stat(kind, value);
        }
        changed
    }

    /// Field-wise max of two records.
    pub fn merged(mut self, other: &StatisticsRecord) -> Self {
        self.merge_max(other);
        self
    }

    /// Read a stored record leniently: unknown names are dropped and any
    /// known field that is not a valid stat value becomes 0.
    pub fn sanitize(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self::new();
        };

        Self(
            fields
                .iter()
                .filter_map(|(name, raw)| {
                    let kind = name.parse::<StatKind>().ok()?;
                    Some((kind, parse_stat_value(raw).unwrap_or(0)))
                })
                .collect(),
        )
    }

    pub fn to_value(&self) -> Value {
        let fields: Map<String, Value> = self
            .iter()
            .map(|(kind, value)| (kind.as_str().to_string(), Value::from(value)))
            .collect();
        Value::Object(fields)
    }
}

impl FromIterator<(StatKind, u64)> for StatisticsRecord {
    fn from_iter<I: IntoIterator<Item = (StatKind, u64)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (kind, value) in iter {
            record.merge_stat(kind, value);
        }
        record
    }
}

/// Store-side merge for [`crate::storage::traits::RemoteStore::update`].
///
/// No prior record: write `delta` as is. Otherwise sanitize what is stored and
/// raise each field present in `delta`.
pub fn merge_transform(delta: StatisticsRecord) -> UpdateTransform {
    Arc::new(move |existing: Option<Value>| {
        let merged = match existing {
            None => delta.clone(),
            Some(stored) => StatisticsRecord::sanitize(&stored).merged(&delta),
        };
        Some(merged.to_value())
    })
}

/// Store-side max for a single integer (leaderboard mirrors).
pub fn max_transform(value: u64) -> UpdateTransform {
    Arc::new(move |existing: Option<Value>| {
        let current = existing.as_ref().and_then(parse_stat_value).unwrap_or(0);
        Some(Value::from(current.max(value)))
    })
}
