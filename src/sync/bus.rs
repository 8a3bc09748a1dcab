// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-shard sync bus.
//!
//! Wraps a [`PubSubTransport`] with connection retry and degraded-mode
//! tracking. Connection attempts back off linearly (`base * attempt`); they
//! are rare, so there is no need for the exponential schedule store calls use.
//!
//! A failed subscription is not fatal. The shard keeps serving local writes
//! and only loses live propagation until peers' next refresh.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::message::CrossServerMessage;
use super::transport::{MessageHandler, PubSubTransport, SubscriptionHandle};
use crate::config::ShardSyncConfig;
use crate::metrics;
use crate::stats::view::SessionStats;

pub struct SyncBus {
    transport: Arc<dyn PubSubTransport>,
    max_retries: u32,
    base_delay: Duration,
    subscriptions: Mutex<Vec<(String, SubscriptionHandle)>>,
    degraded: Mutex<HashSet<String>>,
}

impl SyncBus {
    pub fn new(transport: Arc<dyn PubSubTransport>, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            transport,
            max_retries: max_retries.max(1),
            base_delay,
            subscriptions: Mutex::new(Vec::new()),
            degraded: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(transport: Arc<dyn PubSubTransport>, config: &ShardSyncConfig) -> Self {
        Self::new(transport, config.sync_max_retries, config.sync_base_delay())
    }

    fn linear_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Subscribe `handler` to `topic`, retrying up to `max_retries` times.
    ///
    /// Returns whether a live subscription exists. `false` leaves the topic in
    /// degraded mode.
    pub async fn subscribe(&self, topic: &str, handler: MessageHandler, max_retries: u32) -> bool {
        let max_attempts = max_retries.max(1);

        for attempt in 1..=max_attempts {
            match self.transport.subscribe(topic, handler.clone()).await {
                Ok(handle) => {
                    self.subscriptions.lock().push((topic.to_string(), handle));
                    self.degraded.lock().remove(topic);
                    metrics::set_sync_degraded(topic, false);
                    info!(topic, attempt, "Subscribed to sync topic");
                    return true;
                }
                Err(e) => {
                    warn!(topic, attempt, max_attempts, error = %e, "Subscribe failed");
                    if attempt < max_attempts {
                        sleep(self.linear_delay(attempt)).await;
                    }
                }
            }
        }

        error!(topic, attempts = max_attempts, "Cross-shard sync degraded: no live subscription");
        self.degraded.lock().insert(topic.to_string());
        metrics::set_sync_degraded(topic, true);
        false
    }

    /// Best-effort publish with at most `max_retries` attempts.
    pub async fn publish(&self, topic: &str, payload: Value) -> bool {
        for attempt in 1..=self.max_retries {
            match self.transport.publish(topic, payload.clone()).await {
                Ok(()) => {
                    metrics::record_publish(topic, true);
                    return true;
                }
                Err(e) => {
                    warn!(topic, attempt, max_attempts = self.max_retries, error = %e, "Publish failed");
                    if attempt < self.max_retries {
                        sleep(self.linear_delay(attempt)).await;
                    }
                }
            }
        }
        metrics::record_publish(topic, false);
        false
    }

    pub async fn publish_message(&self, topic: &str, message: &CrossServerMessage) -> bool {
        self.publish(topic, message.to_value()).await
    }

    /// Drop every subscription this bus holds.
    pub async fn disconnect(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (topic, handle) in subscriptions {
            match self.transport.unsubscribe(handle).await {
                Ok(()) => debug!(topic = %topic, handle = %handle, "Unsubscribed"),
                Err(e) => warn!(topic = %topic, error = %e, "Unsubscribe failed"),
            }
        }
    }

    pub fn is_degraded(&self, topic: &str) -> bool {
        self.degraded.lock().contains(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.lock().iter().map(|(topic, _)| topic.clone()).collect()
    }
}

/// Applies inbound statistic updates to the local session view.
pub struct StatsSyncHandler {
    topic: String,
    session: Arc<SessionStats>,
    applied: AtomicU64,
    dropped: AtomicU64,
}

impl StatsSyncHandler {
    pub fn new(topic: impl Into<String>, session: Arc<SessionStats>) -> Self {
        Self {
            topic: topic.into(),
            session,
            applied: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Validate and merge one payload. Invalid payloads are logged and counted.
    pub fn handle(&self, payload: Value) {
        match CrossServerMessage::from_value(&payload) {
            Ok(msg) => {
                let changed = self.session.apply_remote(msg.entity_id, msg.stat, msg.value);
                self.applied.fetch_add(1, Ordering::Relaxed);
                metrics::record_sync_message(&self.topic, "applied");
                debug!(topic = %self.topic, entity = %msg.entity_id, stat = %msg.stat, value = msg.value, changed, "Applied remote stat");
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_sync_message(&self.topic, e.reason());
                warn!(topic = %self.topic, reason = %e, "Dropped invalid sync message");
            }
        }
    }

    pub fn handler(self: &Arc<Self>) -> MessageHandler {
        let this = Arc::clone(self);
        Arc::new(move |payload| this.handle(payload))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityId;
    use crate::stats::record::{StatKind, StatisticsRecord};
    use crate::sync::local::LocalBroker;
    use crate::sync::transport::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    /// Refuses the first `failures` subscribe/publish calls.
    struct Refusing {
        inner: LocalBroker,
        failures: u32,
        calls: AtomicU32,
        at: Mutex<Vec<Instant>>,
    }

    impl Refusing {
        fn new(failures: u32) -> Self {
            Self { inner: LocalBroker::new(), failures, calls: AtomicU32::new(0), at: Mutex::new(Vec::new()) }
        }

        fn refuse(&self) -> bool {
            self.at.lock().push(Instant::now());
            self.calls.fetch_add(1, Ordering::SeqCst) < self.failures
        }
    }

    #[async_trait]
    impl PubSubTransport for Refusing {
        async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
            if self.refuse() {
                return Err(TransportError::Unavailable("refused".into()));
            }
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, TransportError> {
            if self.refuse() {
                return Err(TransportError::Unavailable("refused".into()));
            }
            self.inner.subscribe(topic, handler).await
        }

        async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), TransportError> {
            self.inner.unsubscribe(handle).await
        }
    }

    fn noop() -> MessageHandler {
        Arc::new(|_| {})
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_retries_with_linear_delay() {
        let transport = Arc::new(Refusing::new(2));
        let bus = SyncBus::new(transport.clone(), 3, Duration::from_secs(1));

        assert!(bus.subscribe("StatsSync", noop(), 3).await);

        let at = transport.at.lock().clone();
        assert_eq!(at.len(), 3);
        assert_eq!(at[1] - at[0], Duration::from_secs(1));
        assert_eq!(at[2] - at[1], Duration::from_secs(2));
        assert!(!bus.is_degraded("StatsSync"));
        assert_eq!(bus.subscribed_topics(), vec!["StatsSync".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_gives_up_and_degrades() {
        let transport = Arc::new(Refusing::new(u32::MAX));
        let bus = SyncBus::new(transport.clone(), 3, Duration::from_secs(1));

        assert!(!bus.subscribe("StatsSync", noop(), 3).await);
        assert!(bus.is_degraded("StatsSync"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_is_bounded() {
        let transport = Arc::new(Refusing::new(u32::MAX));
        let bus = SyncBus::new(transport.clone(), 2, Duration::from_millis(100));

        assert!(!bus.publish("StatsSync", json!({})).await);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_drops_subscriptions() {
        let broker = LocalBroker::new();
        let bus = SyncBus::new(Arc::new(broker.clone()), 1, Duration::from_millis(1));
        assert!(bus.subscribe("a", noop(), 1).await);
        assert!(bus.subscribe("b", noop(), 1).await);
        assert_eq!(broker.subscription_count(), 2);

        bus.disconnect().await;
        assert_eq!(broker.subscription_count(), 0);
        assert!(bus.subscribed_topics().is_empty());
    }

    #[test]
    fn test_handler_applies_valid_and_drops_invalid() {
        let session = Arc::new(SessionStats::default());
        let id = EntityId::new(5).unwrap();
        session.join(id, StatisticsRecord::new());
        let handler = StatsSyncHandler::new("StatsSync", session.clone());

        handler.handle(json!({"entityId": 5, "stat": "Donated", "value": 12}));
        handler.handle(json!({"entityId": 5, "stat": "Donated", "value": -1}));
        handler.handle(json!({"entityId": 0, "stat": "Donated", "value": 1}));
        handler.handle(json!({"entityId": 5, "stat": "Gold", "value": 1}));
        handler.handle(json!(["garbage"]));

        assert_eq!(handler.applied(), 1);
        assert_eq!(handler.dropped(), 4);
        assert_eq!(session.get(id).unwrap().get(StatKind::Donated), 12);
    }
}
