// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process pub/sub transport.
//!
//! Clones share one set of topics, so handing a clone to each of several
//! [`crate::SyncBus`] instances models several shards on one message service.
//! Each subscription runs its handler on its own task.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{MessageHandler, PubSubTransport, SubscriptionHandle, TransportError};

const TOPIC_CAPACITY: usize = 1024;

#[derive(Default)]
struct BrokerInner {
    topics: DashMap<String, broadcast::Sender<Value>>,
    subscriptions: DashMap<SubscriptionHandle, JoinHandle<()>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        self.inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

#[async_trait]
impl PubSubTransport for LocalBroker {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
        // no receivers is not an error: nobody is listening yet
        if self.sender(topic).send(payload).is_err() {
            debug!(topic, "Published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, TransportError> {
        let mut receiver = self.sender(topic).subscribe();
        let handle = SubscriptionHandle::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let topic_name = topic.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic_name, skipped, "Subscriber lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.inner.subscriptions.insert(handle, task);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), TransportError> {
        let (_, task) = self
            .inner
            .subscriptions
            .remove(&handle)
            .ok_or(TransportError::UnknownSubscription(handle))?;
        task.abort();
        Ok(())
    }
}
