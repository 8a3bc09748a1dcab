// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Publish/subscribe boundary.
//!
//! Delivery is at most once per publish with no cross-process ordering.
//! Payloads are opaque JSON; receivers validate them.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Called for every payload delivered on a subscribed topic. Must not block.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown subscription {0}")]
    UnknownSubscription(SubscriptionHandle),
    #[error("Transport backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, TransportError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), TransportError>;
}
