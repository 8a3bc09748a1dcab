// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis PUBLISH/SUBSCRIBE transport.
//!
//! Publishing goes through a shared [`ConnectionManager`]. Each subscription
//! opens its own pub/sub connection and forwards messages from a background
//! task; unsubscribing aborts the task, which closes that connection.
//!
//! Channels are namespaced with the same optional prefix as the store
//! (`game:` + `StatsSync` → `game:StatsSync`).

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{MessageHandler, PubSubTransport, SubscriptionHandle, TransportError};

impl From<redis::RedisError> for TransportError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            TransportError::Unavailable(err.to_string())
        } else {
            TransportError::Backend(err.to_string())
        }
    }
}

pub struct RedisPubSub {
    client: Client,
    publisher: ConnectionManager,
    prefix: String,
    subscriptions: DashMap<SubscriptionHandle, JoinHandle<()>>,
    next_id: AtomicU64,
}

impl RedisPubSub {
    pub async fn connect(connection_string: &str, prefix: Option<&str>) -> Result<Self, TransportError> {
        let client = Client::open(connection_string)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            publisher,
            prefix: prefix.unwrap_or("").to_string(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    #[inline]
    fn channel(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
        let mut conn = self.publisher.clone();
        let encoded = serde_json::to_string(&payload)?;
        let receivers: i64 = conn.publish(self.channel(topic), encoded).await?;
        debug!(topic, receivers, "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, TransportError> {
        let channel = self.channel(topic);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let handle = SubscriptionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let raw: String = match msg.get_payload() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Unreadable pub/sub payload");
                        continue;
                    }
                };
                match serde_json::from_str::<Value>(&raw) {
                    Ok(payload) => handler(payload),
                    Err(e) => warn!(channel = %channel, error = %e, "Pub/sub payload is not JSON"),
                }
            }
            debug!(channel = %channel, "Pub/sub stream ended");
        });

        self.subscriptions.insert(handle, task);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), TransportError> {
        let (_, task) = self
            .subscriptions
            .remove(&handle)
            .ok_or(TransportError::UnknownSubscription(handle))?;
        task.abort();
        Ok(())
    }
}

impl Drop for RedisPubSub {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}
