//! The gateway: inbound RPC surface plus open/wait/close lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use green_guardian_common::{GatewayCall, PlantId, RoomId};

use crate::config::{GatewayConfig, StaleRoutePolicy};
use crate::error::{GatewayError, Result};
use crate::rpc::{CallContext, PeerDirectory};
use crate::transport::{PubSub, Subscription};

use super::{Actuator, Dispatcher, ErrorReporter, Publisher, Registry, Topics};

/// Lifecycle state of a [`Gateway`].
///
/// `Created -> Opened -> Closed`, with no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Opened,
    Closed,
}

/// Bridges hubs on the RPC fabric and the MQTT broker.
///
/// Hubs call the registration and forwarding methods; control messages
/// arriving on the broker are routed back to them once the gateway is open.
/// Asynchronous dispatch failures surface through [`wait`](Self::wait).
pub struct Gateway {
    config: GatewayConfig,
    topics: Topics,
    registry: Arc<Registry>,
    publisher: Publisher,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn PubSub>,
    cancel: CancellationToken,
    state: Mutex<Lifecycle>,
    errors_tx: Mutex<Option<mpsc::Sender<GatewayError>>>,
    errors_rx: Mutex<mpsc::Receiver<GatewayError>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Create a gateway. Nothing is subscribed until [`open`](Self::open).
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn PubSub>,
        peers: Arc<dyn PeerDirectory>,
    ) -> Self {
        let topics = Topics::new(config.thing_name.clone());
        let registry = Arc::new(Registry::new());
        let cancel = CancellationToken::new();
        let (errors_tx, errors_rx) = mpsc::channel(config.error_queue_capacity.max(1));

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            peers,
            topics.clone(),
            Duration::from_secs(config.rpc_timeout_secs),
            cancel.clone(),
        ));

        Self {
            publisher: Publisher::new(transport.clone(), topics.clone()),
            config,
            topics,
            registry,
            dispatcher,
            transport,
            cancel,
            state: Mutex::new(Lifecycle::Created),
            errors_tx: Mutex::new(Some(errors_tx)),
            errors_rx: Mutex::new(errors_rx),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn thing_name(&self) -> &str {
        self.topics.thing_name()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        *self.state.lock().await
    }

    // Inbound RPC surface

    pub async fn register_fans(&self, ctx: &CallContext, room_ids: &[RoomId]) -> Result<()> {
        tracing::debug!("RegisterFans(room_ids={:?}) from {}", room_ids, ctx.peer_id);
        self.registry.rooms.register(room_ids, &ctx.peer_id).await;
        Ok(())
    }

    pub async fn unregister_fans(&self, ctx: &CallContext, room_ids: &[RoomId]) -> Result<()> {
        tracing::debug!("UnregisterFans(room_ids={:?}) from {}", room_ids, ctx.peer_id);
        self.registry.rooms.unregister(room_ids).await;
        Ok(())
    }

    pub async fn register_sprinklers(&self, ctx: &CallContext, plant_ids: &[PlantId]) -> Result<()> {
        tracing::debug!("RegisterSprinklers(plant_ids={:?}) from {}", plant_ids, ctx.peer_id);
        self.registry.plants.register(plant_ids, &ctx.peer_id).await;
        Ok(())
    }

    pub async fn unregister_sprinklers(
        &self,
        ctx: &CallContext,
        plant_ids: &[PlantId],
    ) -> Result<()> {
        tracing::debug!("UnregisterSprinklers(plant_ids={:?}) from {}", plant_ids, ctx.peer_id);
        self.registry.plants.unregister(plant_ids).await;
        Ok(())
    }

    pub async fn forward_temperature_measurement(
        &self,
        ctx: &CallContext,
        room_id: &str,
        measurement: i64,
        default_value: i64,
    ) -> Result<()> {
        tracing::debug!(
            "ForwardTemperatureMeasurement(room_id={}, measurement={}, default_value={}) from {}",
            room_id,
            measurement,
            default_value,
            ctx.peer_id
        );
        self.publisher
            .forward_temperature(room_id, measurement, default_value)
            .await
    }

    pub async fn forward_moisture_measurement(
        &self,
        ctx: &CallContext,
        plant_id: &str,
        measurement: i64,
        default_value: i64,
    ) -> Result<()> {
        tracing::debug!(
            "ForwardMoistureMeasurement(plant_id={}, measurement={}, default_value={}) from {}",
            plant_id,
            measurement,
            default_value,
            ctx.peer_id
        );
        self.publisher
            .forward_moisture(plant_id, measurement, default_value)
            .await
    }

    /// Execute a call received over the RPC fabric.
    pub async fn handle_call(&self, ctx: &CallContext, call: GatewayCall) -> Result<()> {
        match call {
            GatewayCall::RegisterFans { room_ids } => self.register_fans(ctx, &room_ids).await,
            GatewayCall::UnregisterFans { room_ids } => self.unregister_fans(ctx, &room_ids).await,
            GatewayCall::RegisterSprinklers { plant_ids } => {
                self.register_sprinklers(ctx, &plant_ids).await
            }
            GatewayCall::UnregisterSprinklers { plant_ids } => {
                self.unregister_sprinklers(ctx, &plant_ids).await
            }
            GatewayCall::ForwardTemperatureMeasurement {
                room_id,
                measurement,
                default_value,
            } => {
                self.forward_temperature_measurement(ctx, &room_id, measurement, default_value)
                    .await
            }
            GatewayCall::ForwardMoistureMeasurement {
                plant_id,
                measurement,
                default_value,
            } => {
                self.forward_moisture_measurement(ctx, &plant_id, measurement, default_value)
                    .await
            }
        }
    }

    /// Apply the stale route policy to a peer that went away.
    pub async fn peer_disconnected(&self, peer_id: &str) {
        match self.config.stale_routes {
            StaleRoutePolicy::Retain => {
                tracing::debug!("Keeping routes of disconnected peer {}", peer_id);
            }
            StaleRoutePolicy::Purge => {
                let rooms = self.registry.rooms.release_peer(peer_id).await;
                let plants = self.registry.plants.release_peer(peer_id).await;
                tracing::info!(
                    "Purged {} rooms and {} plants of disconnected peer {}",
                    rooms.len(),
                    plants.len(),
                    peer_id
                );
            }
        }
    }

    // Lifecycle

    /// Subscribe to the fan and sprinkler control topics and start dispatching.
    ///
    /// Fails with the transport error if either subscription fails, leaving
    /// the gateway in `Created`.
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            Lifecycle::Created => {}
            Lifecycle::Opened => return Err(GatewayError::AlreadyOpen),
            Lifecycle::Closed => return Err(GatewayError::Closed),
        }

        let reporter = match self.errors_tx.lock().await.as_ref() {
            Some(tx) => ErrorReporter::new(tx.clone(), self.cancel.clone()),
            None => return Err(GatewayError::Closed),
        };

        let fan_filter = self.topics.fan_filter();
        let sprinkler_filter = self.topics.sprinkler_filter();

        let fans = self.transport.subscribe(&fan_filter).await?;
        let sprinklers = match self.transport.subscribe(&sprinkler_filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Err(undo) = self.transport.unsubscribe(&fan_filter).await {
                    tracing::warn!("Failed to roll back subscription {}: {}", fan_filter, undo);
                }
                return Err(e.into());
            }
        };

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_dispatch(Actuator::Fan, fans, reporter.clone()));
        tasks.push(self.spawn_dispatch(Actuator::Sprinkler, sprinklers, reporter));

        *state = Lifecycle::Opened;
        tracing::info!("Gateway {} open", self.thing_name());
        Ok(())
    }

    fn spawn_dispatch(
        &self,
        actuator: Actuator,
        subscription: Subscription,
        reporter: ErrorReporter,
    ) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(actuator, subscription, reporter).await })
    }

    /// Block until a dispatch error occurs or the gateway is closed.
    ///
    /// Returns the first queued error. Returns `Ok(())` once [`close`](Self::close)
    /// has run and every queued error was consumed.
    pub async fn wait(&self) -> Result<()> {
        let mut errors = self.errors_rx.lock().await;
        match errors.recv().await {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Unsubscribe from the control topics and shut the gateway down.
    ///
    /// Teardown completes even if unsubscribing fails; the first unsubscribe
    /// error is returned.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == Lifecycle::Closed {
            return Err(GatewayError::Closed);
        }

        let mut result = Ok(());
        if *state == Lifecycle::Opened {
            for filter in [self.topics.fan_filter(), self.topics.sprinkler_filter()] {
                if let Err(e) = self.transport.unsubscribe(&filter).await {
                    tracing::warn!("Failed to unsubscribe from {}: {}", filter, e);
                    if result.is_ok() {
                        result = Err(e.into());
                    }
                }
            }
        }

        self.cancel.cancel();
        self.errors_tx.lock().await.take();
        for task in self.tasks.lock().await.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("Dispatch task ended abnormally: {}", e);
            }
        }

        *state = Lifecycle::Closed;
        tracing::info!("Gateway {} closed", self.thing_name());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{MemoryBroker, MockHub, MockPeers};
    use crate::transport::TransportError;
    use green_guardian_common::HubCall;

    fn gateway(broker: &Arc<MemoryBroker>, peers: &Arc<MockPeers>) -> Gateway {
        Gateway::new(GatewayConfig::new("gw1"), broker.clone(), peers.clone())
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_uses_caller_identity() {
        let gateway = gateway(&Arc::new(MemoryBroker::new()), &Arc::new(MockPeers::new()));

        gateway
            .register_fans(&CallContext::new("p1"), &ids(&["room-1"]))
            .await
            .unwrap();
        gateway
            .register_sprinklers(&CallContext::new("p2"), &ids(&["fern"]))
            .await
            .unwrap();

        assert_eq!(gateway.registry().rooms.lookup("room-1").await.as_deref(), Some("p1"));
        assert_eq!(gateway.registry().plants.lookup("fern").await.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn test_any_peer_may_unregister() {
        let gateway = gateway(&Arc::new(MemoryBroker::new()), &Arc::new(MockPeers::new()));

        gateway
            .register_fans(&CallContext::new("p1"), &ids(&["room-1"]))
            .await
            .unwrap();
        gateway
            .unregister_fans(&CallContext::new("p2"), &ids(&["room-1"]))
            .await
            .unwrap();

        assert!(gateway.registry().rooms.lookup("room-1").await.is_none());
    }

    #[tokio::test]
    async fn test_forward_without_registration() {
        let broker = Arc::new(MemoryBroker::new());
        let gateway = gateway(&broker, &Arc::new(MockPeers::new()));

        gateway
            .handle_call(
                &CallContext::new("p1"),
                GatewayCall::ForwardMoistureMeasurement {
                    plant_id: "fern".to_string(),
                    measurement: 30,
                    default_value: 50,
                },
            )
            .await
            .unwrap();

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "/gateways/gw1/plants/fern/moisture");
    }

    #[tokio::test]
    async fn test_open_subscribes_control_filters() {
        let broker = Arc::new(MemoryBroker::new());
        let gateway = gateway(&broker, &Arc::new(MockPeers::new()));

        gateway.open().await.unwrap();

        let mut filters = broker.active_filters().await;
        filters.sort();
        assert_eq!(
            filters,
            vec![
                "/gateways/gw1/plants/+/sprinkler".to_string(),
                "/gateways/gw1/rooms/+/fan".to_string(),
            ]
        );
        assert_eq!(gateway.lifecycle().await, Lifecycle::Opened);
        assert!(matches!(gateway.open().await, Err(GatewayError::AlreadyOpen)));

        gateway.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_fails_fast_and_rolls_back() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_subscribe("/gateways/gw1/plants/+/sprinkler").await;
        let gateway = gateway(&broker, &Arc::new(MockPeers::new()));

        let result = gateway.open().await;

        assert!(matches!(
            result,
            Err(GatewayError::Transport(TransportError::Subscribe { .. }))
        ));
        assert!(broker.active_filters().await.is_empty());
        assert_eq!(gateway.lifecycle().await, Lifecycle::Created);
    }

    #[tokio::test]
    async fn test_control_message_reaches_owner() {
        let broker = Arc::new(MemoryBroker::new());
        let peers = Arc::new(MockPeers::new());
        let hub = Arc::new(MockHub::new());
        peers.insert("p1", hub.clone()).await;
        let gateway = Arc::new(gateway(&broker, &peers));

        gateway
            .register_fans(&CallContext::new("p1"), &ids(&["room-1"]))
            .await
            .unwrap();
        gateway.open().await.unwrap();

        let waiter = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.wait().await }
        });

        broker
            .inject("/gateways/gw1/rooms/room-1/fan", br#"{"On": true}"#)
            .await;
        hub.wait_for_calls(1).await;
        gateway.close().await.unwrap();

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(
            hub.calls(),
            vec![HubCall::SetFanOn {
                room_id: "room-1".to_string(),
                on: true
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_room_fails_wait() {
        let broker = Arc::new(MemoryBroker::new());
        let peers = Arc::new(MockPeers::new());
        let hub = Arc::new(MockHub::new());
        peers.insert("p1", hub.clone()).await;
        let gateway = gateway(&broker, &peers);
        gateway.open().await.unwrap();

        broker
            .inject("/gateways/gw1/rooms/room-1/fan", br#"{"On": true}"#)
            .await;

        let result = gateway.wait().await;
        assert!(matches!(result, Err(GatewayError::NoSuchRoom(id)) if id == "room-1"));
        assert!(hub.calls().is_empty());

        gateway.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_continues_after_error() {
        let broker = Arc::new(MemoryBroker::new());
        let peers = Arc::new(MockPeers::new());
        let hub = Arc::new(MockHub::new());
        peers.insert("p1", hub.clone()).await;
        let gateway = gateway(&broker, &peers);
        gateway
            .register_sprinklers(&CallContext::new("p1"), &ids(&["fern"]))
            .await
            .unwrap();
        gateway.open().await.unwrap();

        broker
            .inject("/gateways/gw1/plants/fern/sprinkler", b"garbage")
            .await;
        broker
            .inject("/gateways/gw1/plants/fern/sprinkler", br#"{"On": true}"#)
            .await;

        assert!(matches!(gateway.wait().await, Err(GatewayError::Decode(_))));
        hub.wait_for_calls(1).await;
        assert_eq!(
            hub.calls(),
            vec![HubCall::SetSprinklerOn {
                plant_id: "fern".to_string(),
                on: true
            }]
        );

        gateway.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_unsubscribes_both_filters() {
        let broker = Arc::new(MemoryBroker::new());
        let gateway = gateway(&broker, &Arc::new(MockPeers::new()));
        gateway.open().await.unwrap();

        gateway.close().await.unwrap();

        assert!(broker.active_filters().await.is_empty());
        assert_eq!(gateway.lifecycle().await, Lifecycle::Closed);
        assert!(gateway.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_twice_and_reopen_are_rejected() {
        let gateway = gateway(&Arc::new(MemoryBroker::new()), &Arc::new(MockPeers::new()));
        gateway.open().await.unwrap();
        gateway.close().await.unwrap();

        assert!(matches!(gateway.close().await, Err(GatewayError::Closed)));
        assert!(matches!(gateway.open().await, Err(GatewayError::Closed)));
    }

    #[tokio::test]
    async fn test_close_reports_unsubscribe_failure_but_tears_down() {
        let broker = Arc::new(MemoryBroker::new());
        let gateway = gateway(&broker, &Arc::new(MockPeers::new()));
        gateway.open().await.unwrap();
        broker.fail_unsubscribe(true);

        let result = gateway.close().await;

        assert!(matches!(
            result,
            Err(GatewayError::Transport(TransportError::Unsubscribe { .. }))
        ));
        assert_eq!(gateway.lifecycle().await, Lifecycle::Closed);
        assert!(gateway.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_policy_releases_routes() {
        let mut config = GatewayConfig::new("gw1");
        config.stale_routes = StaleRoutePolicy::Purge;
        let gateway = Gateway::new(
            config,
            Arc::new(MemoryBroker::new()),
            Arc::new(MockPeers::new()),
        );
        let ctx = CallContext::new("p1");
        gateway.register_fans(&ctx, &ids(&["room-1"])).await.unwrap();
        gateway.register_sprinklers(&ctx, &ids(&["fern"])).await.unwrap();
        gateway
            .register_fans(&CallContext::new("p2"), &ids(&["room-2"]))
            .await
            .unwrap();

        gateway.peer_disconnected("p1").await;

        assert!(gateway.registry().rooms.lookup("room-1").await.is_none());
        assert!(gateway.registry().plants.lookup("fern").await.is_none());
        assert_eq!(gateway.registry().rooms.lookup("room-2").await.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_routes() {
        let gateway = gateway(&Arc::new(MemoryBroker::new()), &Arc::new(MockPeers::new()));
        gateway
            .register_fans(&CallContext::new("p1"), &ids(&["room-1"]))
            .await
            .unwrap();

        gateway.peer_disconnected("p1").await;

        assert_eq!(gateway.registry().rooms.lookup("room-1").await.as_deref(), Some("p1"));
    }
}
