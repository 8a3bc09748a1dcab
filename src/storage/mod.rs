// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote store backends.
//!
//! - [`memory`]: in-process store with settable quotas, for tests and demos
//! - [`redis`]: Redis-backed store with a shared per-minute request budget

pub mod traits;
pub mod memory;
pub mod redis;
