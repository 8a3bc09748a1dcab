// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity statistics.
//!
//! - [`record`]: stat kinds, records, and the max-merge rule
//! - [`store`]: merge-on-write persistence through the resilient client
//! - [`view`]: the local session set and its display boundary

pub mod record;
pub mod store;
pub mod view;

pub use record::{StatKind, StatisticsRecord};
pub use store::StatisticsStore;
pub use view::{DirtyRecord, SessionStats, StatDisplay};
