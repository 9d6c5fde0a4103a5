use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::transport::{InboundMessage, PubSub, Subscription, SubscriptionRoutes, TransportError};

/// In-process broker: records every publish and loops it back to matching
/// subscriptions, with switches to make each operation fail.
pub struct MemoryBroker {
    routes: SubscriptionRoutes,
    published: Mutex<Vec<InboundMessage>>,
    failing_filters: Mutex<HashSet<String>>,
    fail_publish: AtomicBool,
    fail_unsubscribe: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(subscription_capacity: usize) -> Self {
        Self {
            routes: SubscriptionRoutes::new(subscription_capacity),
            published: Mutex::new(Vec::new()),
            failing_filters: Mutex::new(HashSet::new()),
            fail_publish: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
        }
    }

    /// Everything published so far, oldest first.
    pub async fn published(&self) -> Vec<InboundMessage> {
        self.published.lock().await.clone()
    }

    /// Deliver a message as if another client had published it.
    pub async fn inject(&self, topic: &str, payload: &[u8]) -> usize {
        self.routes
            .deliver(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            })
            .await
    }

    pub async fn active_filters(&self) -> Vec<String> {
        self.routes.filters().await
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub async fn fail_subscribe(&self, filter: &str) {
        self.failing_filters.lock().await.insert(filter.to_string());
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PubSub for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }
        let message = InboundMessage {
            topic: topic.to_string(),
            payload,
        };
        self.published.lock().await.push(message.clone());
        self.routes.deliver(message).await;
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription, TransportError> {
        if self.failing_filters.lock().await.contains(filter) {
            return Err(TransportError::Subscribe {
                filter: filter.to_string(),
                reason: "not authorized".to_string(),
            });
        }
        Ok(self.routes.add(filter).await)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Unsubscribe {
                filter: filter.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }
        self.routes.remove(filter).await;
        Ok(())
    }
}
