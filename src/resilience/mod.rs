// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience layer: backoff, admission control, counters, and the client
//! that combines them around every store call.

pub mod retry;
pub mod counters;
pub mod admission;
pub mod client;
