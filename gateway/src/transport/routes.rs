//! Fan-out of inbound messages to subscriptions.

use tokio::sync::{mpsc, RwLock};

use super::{InboundMessage, Subscription};

/// Check whether `topic` matches an MQTT topic `filter`.
///
/// `+` matches exactly one level, `#` matches the remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Route {
    filter: String,
    tx: mpsc::Sender<InboundMessage>,
}

/// Active subscriptions of a transport, keyed by filter.
///
/// Each filter owns one bounded channel; a full channel makes [`deliver`](Self::deliver)
/// wait, which pushes back on whatever reads from the broker.
pub struct SubscriptionRoutes {
    capacity: usize,
    routes: RwLock<Vec<Route>>,
}

impl SubscriptionRoutes {
    /// Create an empty table whose subscription channels hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Open a subscription for `filter`, replacing any previous one for the same filter.
    pub async fn add(&self, filter: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut routes = self.routes.write().await;
        routes.retain(|r| r.filter != filter);
        routes.push(Route {
            filter: filter.to_string(),
            tx,
        });
        Subscription::new(filter.to_string(), rx)
    }

    /// Remove the subscription for `filter`, ending its stream.
    pub async fn remove(&self, filter: &str) -> bool {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|r| r.filter != filter);
        routes.len() != before
    }

    /// Remove every subscription.
    pub async fn clear(&self) {
        self.routes.write().await.clear();
    }

    /// Filters with an active subscription.
    pub async fn filters(&self) -> Vec<String> {
        self.routes
            .read()
            .await
            .iter()
            .map(|r| r.filter.clone())
            .collect()
    }

    /// Deliver a message to every matching subscription.
    ///
    /// Returns the number of subscriptions that received it.
    pub async fn deliver(&self, message: InboundMessage) -> usize {
        let targets: Vec<mpsc::Sender<InboundMessage>> = self
            .routes
            .read()
            .await
            .iter()
            .filter(|r| topic_matches(&r.filter, &message.topic))
            .map(|r| r.tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in targets {
            if tx.send(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::trace!("Subscription for {} dropped before delivery", message.topic);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_single_level_wildcard() {
        let filter = "/gateways/gw1/rooms/+/fan";
        assert!(topic_matches(filter, "/gateways/gw1/rooms/room-1/fan"));
        assert!(!topic_matches(filter, "/gateways/gw1/rooms/room-1/temperature"));
        assert!(!topic_matches(filter, "/gateways/gw1/rooms/a/b/fan"));
        assert!(!topic_matches(filter, "/gateways/gw2/rooms/room-1/fan"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("/gateways/#", "/gateways/gw1/plants/p/moisture"));
        assert!(topic_matches("sport/#", "sport"));
        assert!(!topic_matches("sport/#", "news/today"));
    }

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[tokio::test]
    async fn test_deliver_to_matching_only() {
        let routes = SubscriptionRoutes::new(4);
        let mut fans = routes.add("/g/rooms/+/fan").await;
        let mut sprinklers = routes.add("/g/plants/+/sprinkler").await;

        assert_eq!(routes.deliver(message("/g/rooms/r1/fan")).await, 1);

        assert_eq!(fans.next().await.unwrap().topic, "/g/rooms/r1/fan");
        assert!(sprinklers.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_ends_stream() {
        let routes = SubscriptionRoutes::new(4);
        let mut sub = routes.add("a/+").await;

        assert!(routes.remove("a/+").await);
        assert!(!routes.remove("a/+").await);
        assert!(sub.next().await.is_none());
        assert_eq!(routes.deliver(message("a/b")).await, 0);
    }

    #[tokio::test]
    async fn test_add_replaces_same_filter() {
        let routes = SubscriptionRoutes::new(4);
        let mut first = routes.add("a/+").await;
        let mut second = routes.add("a/+").await;

        assert_eq!(routes.filters().await, vec!["a/+".to_string()]);
        assert!(first.next().await.is_none());

        routes.deliver(message("a/x")).await;
        assert_eq!(second.next().await.unwrap().topic, "a/x");
    }
}
