//! WebSocket client for gateway connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use green_guardian_common::{
    CallReturn, GatewayCall, GatewayMessage, GatewayRequest, HubCall, HubHello, HubMessage,
    HubRequest,
};

use crate::actuators::{Actuators, Sensors};
use crate::config::{GatewayConfig, HubConfig, SensorsConfig};
use crate::error::{ActuatorError, ClientError};

const WELCOME_TIMEOUT_SECS: u64 = 10;

/// Calls this hub made on the gateway that have not returned yet.
struct OutgoingCalls {
    tx: mpsc::Sender<HubMessage>,
    next_call_id: AtomicU64,
    methods: Mutex<HashMap<u64, &'static str>>,
}

impl OutgoingCalls {
    fn new(tx: mpsc::Sender<HubMessage>) -> Self {
        Self {
            tx,
            next_call_id: AtomicU64::new(1),
            methods: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a call. `false` once the connection is gone.
    async fn call(&self, call: GatewayCall) -> bool {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        self.methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_id, call.method());

        let request = HubMessage::Call(GatewayRequest { call_id, call });
        if self.tx.send(request).await.is_err() {
            self.methods
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&call_id);
            return false;
        }
        true
    }

    fn returned(&self, ret: CallReturn) {
        let method = self
            .methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ret.call_id);

        match (method, ret.error) {
            (Some(method), Some(error)) => {
                tracing::warn!("{} failed on gateway: {}", method, error);
            }
            (Some(method), None) => tracing::debug!("{} succeeded", method),
            (None, _) => tracing::debug!("Return for unknown call {}", ret.call_id),
        }
    }
}

/// Gateway WebSocket client.
///
/// Handles connection lifecycle, registration, measurement reporting, and
/// control commands from the gateway.
pub struct GatewayClient {
    config: GatewayConfig,
    hub: HubConfig,
    sensors_config: SensorsConfig,
    actuators: Arc<dyn Actuators>,
    sensors: Arc<dyn Sensors>,
}

impl GatewayClient {
    pub fn new(
        config: GatewayConfig,
        hub: HubConfig,
        sensors_config: SensorsConfig,
        actuators: Arc<dyn Actuators>,
        sensors: Arc<dyn Sensors>,
    ) -> Self {
        Self {
            config,
            hub,
            sensors_config,
            actuators,
            sensors,
        }
    }

    /// Start the client with automatic reconnection.
    ///
    /// This runs indefinitely, reconnecting on connection loss.
    pub async fn run(&self) {
        loop {
            tracing::info!("Connecting to gateway at {}", self.config.ws_url);

            match self.connect_and_run().await {
                Ok(()) => {
                    tracing::info!("Gateway connection closed normally");
                }
                Err(e) => {
                    tracing::error!("Gateway connection error: {}", e);
                }
            }

            tracing::info!(
                "Reconnecting in {} seconds...",
                self.config.reconnect_delay_secs
            );
            tokio::time::sleep(Duration::from_secs(self.config.reconnect_delay_secs)).await;
        }
    }

    /// Connect to gateway and run message loop.
    async fn connect_and_run(&self) -> Result<(), ClientError> {
        let (ws_stream, _) = connect_async(&self.config.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let hello = HubMessage::Hello(HubHello::new(
            self.hub.name.clone(),
            self.config.auth_token.clone(),
        ));
        write.send(Message::Text(serde_json::to_string(&hello)?)).await?;

        // Wait for welcome with timeout
        match timeout(Duration::from_secs(WELCOME_TIMEOUT_SECS), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<GatewayMessage>(&text)? {
                GatewayMessage::Welcome { peer_id } => {
                    tracing::info!("Connected to gateway as peer {}", peer_id);
                }
                GatewayMessage::Error { code, message } => {
                    return Err(ClientError::Rejected { code, message });
                }
                other => {
                    return Err(ClientError::UnexpectedFrame(format!("{:?}", other)));
                }
            },
            Ok(Some(Ok(other))) => {
                return Err(ClientError::UnexpectedFrame(format!("{:?}", other)));
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => return Err(ClientError::Closed),
            Err(_) => return Err(ClientError::HandshakeTimeout(WELCOME_TIMEOUT_SECS)),
        }

        // Create channel for outbound messages
        let (tx, mut rx) = mpsc::channel::<HubMessage>(32);
        let calls = Arc::new(OutgoingCalls::new(tx.clone()));

        for call in self.registrations() {
            calls.call(call).await;
        }

        // Spawn measurement task
        let period = Duration::from_secs(self.config.measurement_interval_secs.max(1));
        let measurement_handle = tokio::spawn({
            let calls = calls.clone();
            let reporter = MeasurementReporter {
                hub: self.hub.clone(),
                defaults: self.sensors_config,
                sensors: self.sensors.clone(),
            };
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    for call in reporter.measurements() {
                        if !calls.call(call).await {
                            return;
                        }
                    }
                }
            }
        });

        // Main message loop
        let result = self
            .message_loop(&mut write, &mut read, &mut rx, &tx, &calls)
            .await;

        // Clean up
        measurement_handle.abort();

        result
    }

    /// Registration calls for everything this hub owns.
    fn registrations(&self) -> Vec<GatewayCall> {
        let mut calls = Vec::new();
        if !self.hub.rooms.is_empty() {
            calls.push(GatewayCall::RegisterFans {
                room_ids: self.hub.rooms.clone(),
            });
        }
        if !self.hub.plants.is_empty() {
            calls.push(GatewayCall::RegisterSprinklers {
                plant_ids: self.hub.plants.clone(),
            });
        }
        calls
    }

    async fn message_loop<S, R>(
        &self,
        write: &mut S,
        read: &mut R,
        rx: &mut mpsc::Receiver<HubMessage>,
        tx: &mpsc::Sender<HubMessage>,
        calls: &OutgoingCalls,
    ) -> Result<(), ClientError>
    where
        S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                // Handle outbound messages
                Some(msg) = rx.recv() => {
                    let json = serde_json::to_string(&msg)?;
                    write.send(Message::Text(json)).await?;
                }

                // Handle inbound messages
                Some(result) = read.next() => {
                    match result {
                        Ok(Message::Text(text)) => {
                            if let Err(e) = self.handle_gateway_message(&text, tx, calls) {
                                tracing::error!("Error handling gateway message: {}", e);
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Ok(Message::Close(_)) => {
                            tracing::info!("Gateway sent close frame");
                            return Ok(());
                        }
                        Ok(_) => {} // Ignore other message types
                        Err(e) => return Err(e.into()),
                    }
                }

                else => {
                    return Ok(());
                }
            }
        }
    }

    fn handle_gateway_message(
        &self,
        text: &str,
        tx: &mpsc::Sender<HubMessage>,
        calls: &OutgoingCalls,
    ) -> Result<(), ClientError> {
        let msg: GatewayMessage = serde_json::from_str(text)?;

        match msg {
            GatewayMessage::Call(HubRequest { call_id, call }) => {
                let actuators = self.actuators.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let ret = match apply(actuators.as_ref(), &call).await {
                        Ok(()) => CallReturn::ok(call_id),
                        Err(e) => {
                            tracing::warn!("Failed to apply {:?}: {}", call, e);
                            CallReturn::err(call_id, e.to_string())
                        }
                    };
                    let _ = tx.send(HubMessage::Return(ret)).await;
                });
            }

            GatewayMessage::Return(ret) => calls.returned(ret),

            GatewayMessage::Welcome { peer_id } => {
                tracing::warn!("Received unexpected Welcome for {} after handshake", peer_id);
            }

            GatewayMessage::Error { code, message } => {
                tracing::error!("Gateway error: {} - {}", code, message);
            }
        }

        Ok(())
    }
}

async fn apply(actuators: &dyn Actuators, call: &HubCall) -> Result<(), ActuatorError> {
    match call {
        HubCall::SetFanOn { room_id, on } => actuators.set_fan_on(room_id, *on).await,
        HubCall::SetSprinklerOn { plant_id, on } => actuators.set_sprinkler_on(plant_id, *on).await,
    }
}

/// Builds one round of measurement forwards.
struct MeasurementReporter {
    hub: HubConfig,
    defaults: SensorsConfig,
    sensors: Arc<dyn Sensors>,
}

impl MeasurementReporter {
    fn measurements(&self) -> Vec<GatewayCall> {
        let temperatures = self.hub.rooms.iter().map(|room_id| {
            GatewayCall::ForwardTemperatureMeasurement {
                room_id: room_id.clone(),
                measurement: self.sensors.temperature(room_id),
                default_value: self.defaults.default_temperature,
            }
        });
        let moistures = self.hub.plants.iter().map(|plant_id| {
            GatewayCall::ForwardMoistureMeasurement {
                plant_id: plant_id.clone(),
                measurement: self.sensors.moisture(plant_id),
                default_value: self.defaults.default_moisture,
            }
        });
        temperatures.chain(moistures).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSensors;

    impl Sensors for FixedSensors {
        fn temperature(&self, _room_id: &str) -> i64 {
            23
        }

        fn moisture(&self, _plant_id: &str) -> i64 {
            41
        }
    }

    fn hub(rooms: &[&str], plants: &[&str]) -> HubConfig {
        HubConfig {
            name: "greenhouse".to_string(),
            rooms: rooms.iter().map(|s| s.to_string()).collect(),
            plants: plants.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_measurements_cover_every_device() {
        let reporter = MeasurementReporter {
            hub: hub(&["r1", "r2"], &["fern"]),
            defaults: SensorsConfig::default(),
            sensors: Arc::new(FixedSensors),
        };

        let calls = reporter.measurements();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            GatewayCall::ForwardTemperatureMeasurement {
                room_id: "r1".to_string(),
                measurement: 23,
                default_value: 20,
            }
        );
        assert_eq!(
            calls[2],
            GatewayCall::ForwardMoistureMeasurement {
                plant_id: "fern".to_string(),
                measurement: 41,
                default_value: 50,
            }
        );
    }

    #[tokio::test]
    async fn test_outgoing_calls_are_numbered() {
        let (tx, mut rx) = mpsc::channel(4);
        let calls = OutgoingCalls::new(tx);

        assert!(
            calls
                .call(GatewayCall::RegisterFans {
                    room_ids: vec!["r1".to_string()]
                })
                .await
        );
        assert!(
            calls
                .call(GatewayCall::UnregisterFans {
                    room_ids: vec!["r1".to_string()]
                })
                .await
        );

        let first = rx.recv().await;
        let second = rx.recv().await;
        match (first, second) {
            (Some(HubMessage::Call(first)), Some(HubMessage::Call(second))) => {
                assert_eq!(first.call_id, 1);
                assert_eq!(second.call_id, 2);
            }
            other => panic!("Expected two calls, got {:?}", other),
        }

        calls.returned(CallReturn::err(1, "boom"));
        calls.returned(CallReturn::ok(2));
        assert!(calls
            .methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty());
    }

    #[tokio::test]
    async fn test_call_after_disconnect_is_dropped() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let calls = OutgoingCalls::new(tx);

        assert!(
            !calls
                .call(GatewayCall::RegisterSprinklers {
                    plant_ids: vec!["fern".to_string()]
                })
                .await
        );
        assert!(calls
            .methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty());
    }
}
