//! MQTT transport backed by `rumqttc`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::MqttConfig;

use super::{InboundMessage, PubSub, Subscription, SubscriptionRoutes, TransportError};

type SubAckWaiter = Option<oneshot::Sender<Result<(), String>>>;

#[derive(Default)]
struct SubAckQueues {
    /// Requests handed to the event loop, in the order they will go out.
    queued: VecDeque<SubAckWaiter>,
    /// Requests on the wire, by packet id.
    sent: HashMap<u16, SubAckWaiter>,
}

/// Matches `SubAck`s to the `subscribe` calls waiting for them.
///
/// The event loop sends requests in queue order, so the n-th outgoing
/// `Subscribe` packet belongs to the n-th tracked request. Restores issued on
/// reconnect are tracked without a waiter to keep that order intact.
#[derive(Default)]
struct SubAckTracker {
    queues: Mutex<SubAckQueues>,
}

impl SubAckTracker {
    fn lock(&self) -> MutexGuard<'_, SubAckQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a subscribe request through `send`, recording `waiter` only if it was accepted.
    fn track<E>(&self, waiter: SubAckWaiter, send: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        let mut queues = self.lock();
        send()?;
        queues.queued.push_back(waiter);
        Ok(())
    }

    fn sent(&self, pkid: u16) {
        let mut queues = self.lock();
        if let Some(waiter) = queues.queued.pop_front() {
            queues.sent.insert(pkid, waiter);
        }
    }

    fn acked(&self, pkid: u16, return_codes: &[SubscribeReasonCode]) {
        let Some(waiter) = self.lock().sent.remove(&pkid) else {
            return;
        };
        let result = if return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err("broker refused subscription".to_string())
        } else {
            Ok(())
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                if let Err(reason) = result {
                    tracing::warn!("Failed to restore subscription: {}", reason);
                }
            }
        }
    }

    /// Drop every waiter; their `subscribe` calls fail.
    fn fail_all(&self) {
        let mut queues = self.lock();
        queues.queued.clear();
        queues.sent.clear();
    }
}

/// Broker connection shared by the publisher and the dispatcher.
///
/// A background task drives the `rumqttc` event loop, reconnecting after
/// failures and routing incoming publishes to the matching subscriptions.
/// Requests fail straight away while the broker is unreachable and are
/// otherwise bounded by `request_timeout_secs`.
pub struct MqttTransport {
    client: AsyncClient,
    routes: Arc<SubscriptionRoutes>,
    subacks: Arc<SubAckTracker>,
    connected: watch::Receiver<bool>,
    qos: QoS,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl MqttTransport {
    /// Create the client and spawn its event loop.
    ///
    /// `subscription_capacity` bounds each subscription's buffer. The event
    /// loop stops when `cancel` fires.
    pub fn connect(
        config: &MqttConfig,
        subscription_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, config.channel_capacity);
        let routes = Arc::new(SubscriptionRoutes::new(subscription_capacity));
        let subacks = Arc::new(SubAckTracker::default());
        let (connected_tx, connected) = watch::channel(false);
        let qos = qos_from_level(config.qos);

        tracing::info!(
            "Connecting to MQTT broker at {}:{} as {}",
            config.host,
            config.port,
            config.client_id
        );

        tokio::spawn(drive_event_loop(
            EventLoopContext {
                client: client.clone(),
                routes: routes.clone(),
                subacks: subacks.clone(),
                connected: connected_tx,
                qos,
                reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            },
            event_loop,
            cancel.clone(),
        ));

        Self {
            client,
            routes,
            subacks,
            connected,
            qos,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            cancel,
        }
    }

    /// Whether the last connection attempt reached the broker.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait for the first `ConnAck`, giving up after `within`.
    pub async fn wait_connected(&self, within: Duration) -> Result<(), TransportError> {
        let mut connected = self.connected.clone();
        let result = match timeout(within, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Unreachable {
                reason: format!("no ConnAck within {}s", within.as_secs()),
            }),
        };
        result
    }

    /// Disconnect from the broker and stop the event loop.
    pub async fn shutdown(&self) {
        if self.is_connected() {
            match timeout(self.request_timeout, self.client.disconnect()).await {
                Ok(Err(e)) => tracing::debug!("MQTT disconnect failed: {}", e),
                Err(_) => tracing::debug!("MQTT disconnect timed out"),
                Ok(Ok(())) => {}
            }
        }
        self.cancel.cancel();
        self.subacks.fail_all();
        self.routes.clear().await;
    }

    async fn request_subscribe(&self, filter: &str) -> Result<(), String> {
        if !self.is_connected() {
            return Err("not connected to broker".to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.subacks
            .track(Some(tx), || self.client.try_subscribe(filter, self.qos))
            .map_err(|e| e.to_string())?;

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("connection lost before SubAck".to_string()),
            Err(_) => Err(format!(
                "no SubAck within {}s",
                self.request_timeout.as_secs()
            )),
        }
    }
}

#[async_trait]
impl PubSub for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let failed = |reason: String| TransportError::Publish {
            topic: topic.to_string(),
            reason,
        };
        if !self.is_connected() {
            return Err(failed("not connected to broker".to_string()));
        }

        match timeout(
            self.request_timeout,
            self.client.publish(topic, self.qos, false, payload),
        )
        .await
        {
            Ok(result) => result.map_err(|e| failed(e.to_string())),
            Err(_) => Err(failed(format!(
                "request queue still full after {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription, TransportError> {
        let subscription = self.routes.add(filter).await;
        if let Err(reason) = self.request_subscribe(filter).await {
            self.routes.remove(filter).await;
            return Err(TransportError::Subscribe {
                filter: filter.to_string(),
                reason,
            });
        }
        Ok(subscription)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.routes.remove(filter).await;
        if !self.is_connected() {
            // Sessions are clean; the broker drops the filter with the connection.
            tracing::debug!("Broker unreachable, {} forgotten locally", filter);
            return Ok(());
        }

        let failed = |reason: String| TransportError::Unsubscribe {
            filter: filter.to_string(),
            reason,
        };
        match timeout(self.request_timeout, self.client.unsubscribe(filter)).await {
            Ok(result) => result.map_err(|e| failed(e.to_string())),
            Err(_) => Err(failed(format!(
                "request queue still full after {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

struct EventLoopContext {
    client: AsyncClient,
    routes: Arc<SubscriptionRoutes>,
    subacks: Arc<SubAckTracker>,
    connected: watch::Sender<bool>,
    qos: QoS,
    reconnect_delay: Duration,
}

async fn drive_event_loop(ctx: EventLoopContext, mut event_loop: EventLoop, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if ctx.routes.deliver(message).await == 0 {
                    tracing::debug!("Dropping MQTT message with no active subscription");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                ctx.connected.send_replace(true);
                // Sessions are clean, so the broker forgot our filters.
                for filter in ctx.routes.filters().await {
                    let restored = ctx
                        .subacks
                        .track(None, || ctx.client.try_subscribe(filter.as_str(), ctx.qos));
                    if let Err(e) = restored {
                        tracing::warn!("Failed to restore subscription {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => ctx.subacks.sent(pkid),
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                ctx.subacks.acked(suback.pkid, &suback.return_codes);
            }
            Ok(_) => {}
            Err(e) => {
                ctx.connected.send_replace(false);
                ctx.subacks.fail_all();
                tracing::warn!(
                    "MQTT connection error: {}, retrying in {}s",
                    e,
                    ctx.reconnect_delay.as_secs()
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ctx.reconnect_delay) => {}
                }
            }
        }
    }

    ctx.connected.send_replace(false);
    tracing::info!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens on port 1.
            port: 1,
            channel_capacity: 1,
            reconnect_delay_secs: 1,
            request_timeout_secs: 1,
            ..MqttConfig::default()
        }
    }

    fn waiter() -> (SubAckWaiter, oneshot::Receiver<Result<(), String>>) {
        let (tx, rx) = oneshot::channel();
        (Some(tx), rx)
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_requests_fail_while_broker_unreachable() {
        let cancel = CancellationToken::new();
        let transport = MqttTransport::connect(&unreachable_broker(), 8, cancel.clone());

        for _ in 0..4 {
            let result = timeout(
                Duration::from_secs(3),
                transport.publish("/gateways/gw1/rooms/r1/temperature", b"{}".to_vec()),
            )
            .await
            .expect("publish must not hang");
            assert!(matches!(result, Err(TransportError::Publish { .. })));
        }

        let result = timeout(
            Duration::from_secs(3),
            transport.subscribe("/gateways/gw1/rooms/+/fan"),
        )
        .await
        .expect("subscribe must not hang");
        assert!(matches!(result, Err(TransportError::Subscribe { .. })));
        assert!(transport.routes.filters().await.is_empty());
        assert!(!transport.is_connected());

        let waited = transport.wait_connected(Duration::from_millis(200)).await;
        assert!(matches!(waited, Err(TransportError::Unreachable { .. })));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_suback_resolves_waiters_in_send_order() {
        let tracker = SubAckTracker::default();
        let (first, first_rx) = waiter();
        let (second, second_rx) = waiter();
        tracker.track(first, || Ok::<(), ()>(())).unwrap();
        tracker.track(None, || Ok::<(), ()>(())).unwrap();
        tracker.track(second, || Ok::<(), ()>(())).unwrap();

        tracker.sent(7);
        tracker.sent(8);
        tracker.sent(9);

        tracker.acked(9, &[SubscribeReasonCode::Failure]);
        tracker.acked(8, &[SubscribeReasonCode::Success(QoS::AtMostOnce)]);
        tracker.acked(7, &[SubscribeReasonCode::Success(QoS::AtMostOnce)]);

        assert_eq!(first_rx.await.unwrap(), Ok(()));
        assert!(second_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_tracked() {
        let tracker = SubAckTracker::default();
        let (rejected, rejected_rx) = waiter();
        let (accepted, accepted_rx) = waiter();

        assert!(tracker.track(rejected, || Err("queue full")).is_err());
        tracker.track(accepted, || Ok::<(), ()>(())).unwrap();
        tracker.sent(1);
        tracker.acked(1, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);

        assert!(rejected_rx.await.is_err());
        assert_eq!(accepted_rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_connection_loss_fails_waiters() {
        let tracker = SubAckTracker::default();
        let (queued, queued_rx) = waiter();
        let (sent, sent_rx) = waiter();
        tracker.track(sent, || Ok::<(), ()>(())).unwrap();
        tracker.sent(3);
        tracker.track(queued, || Ok::<(), ()>(())).unwrap();

        tracker.fail_all();

        assert!(queued_rx.await.is_err());
        assert!(sent_rx.await.is_err());
    }
}
