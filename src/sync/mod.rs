// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-shard synchronization over publish/subscribe.
//!
//! - [`message`]: wire format and validation of statistic updates
//! - [`transport`]: the pub/sub boundary trait
//! - [`local`]: in-process transport (tests, single-host setups)
//! - [`redis`]: Redis PUBLISH/SUBSCRIBE transport
//! - [`bus`]: retrying bus and the inbound statistics handler

pub mod message;
pub mod transport;
pub mod local;
pub mod redis;
pub mod bus;

pub use bus::{StatsSyncHandler, SyncBus};
pub use local::LocalBroker;
pub use message::{CrossServerMessage, ValidationError};
pub use transport::{MessageHandler, PubSubTransport, SubscriptionHandle, TransportError};
