//! Publish/subscribe transports.
//!
//! The gateway only needs three operations from its broker: publish a
//! payload, subscribe to a filter and unsubscribe from it. Every
//! subscription is handed back as a bounded stream of messages so the
//! consumer decides how fast it drains it.

mod mqtt;
mod routes;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use mqtt::MqttTransport;
pub use routes::{topic_matches, SubscriptionRoutes};

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Errors from the pub/sub transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("unsubscribe from {filter} failed: {reason}")]
    Unsubscribe { filter: String, reason: String },

    #[error("broker unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("transport is closed")]
    Closed,
}

/// Stream of messages matching one topic filter.
///
/// The stream ends once the filter is unsubscribed or the transport shuts down.
#[derive(Debug)]
pub struct Subscription {
    filter: String,
    rx: mpsc::Receiver<InboundMessage>,
}

impl Subscription {
    pub fn new(filter: String, rx: mpsc::Receiver<InboundMessage>) -> Self {
        Self { filter, rx }
    }

    /// The filter this subscription was created with.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Wait for the next message, `None` once the subscription is gone.
    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

/// A pub/sub broker connection.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish `payload` on `topic`, returning once the transport accepted it.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to a topic filter (`+` and `#` wildcards allowed).
    async fn subscribe(&self, filter: &str) -> Result<Subscription, TransportError>;

    /// Drop a previously created subscription.
    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;
}
