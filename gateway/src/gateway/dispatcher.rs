//! Routing of MQTT control messages to the hub owning the target entity.
//!
//! Each control subscription is drained by its own loop. A message is
//! resolved to its owner through the registry, the owner to a live handle
//! through the peer directory, and the decoded state is then pushed to the
//! hub. Failures never stop the loop; they are handed to the error queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use green_guardian_common::ActuatorState;

use crate::error::{GatewayError, Result};
use crate::rpc::{PeerDirectory, RpcError};
use crate::transport::{InboundMessage, Subscription};

use super::topics::wildcard_segment;
use super::{OwnerTable, Registry, Topics};

/// Kind of actuator a control subscription addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    Fan,
    Sprinkler,
}

impl Actuator {
    fn no_such(self, id: &str) -> GatewayError {
        match self {
            Actuator::Fan => GatewayError::NoSuchRoom(id.to_string()),
            Actuator::Sprinkler => GatewayError::NoSuchPlant(id.to_string()),
        }
    }
}

impl std::fmt::Display for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actuator::Fan => write!(f, "fan"),
            Actuator::Sprinkler => write!(f, "sprinkler"),
        }
    }
}

/// Sending half of the gateway's error queue.
///
/// A full queue blocks the reporting loop until the gateway is cancelled;
/// after that, reports are discarded.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<GatewayError>,
    cancel: CancellationToken,
}

impl ErrorReporter {
    pub fn new(tx: mpsc::Sender<GatewayError>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    pub async fn report(&self, error: GatewayError) {
        tracing::warn!("Control message failed: {}", error);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!("Gateway cancelled, discarding error");
            }
            result = self.tx.send(error) => {
                if result.is_err() {
                    tracing::debug!("Error queue closed, discarding error");
                }
            }
        }
    }
}

/// Resolves control messages to hubs and invokes their actuator methods.
pub struct Dispatcher {
    registry: Arc<Registry>,
    peers: Arc<dyn PeerDirectory>,
    topics: Topics,
    rpc_timeout: Duration,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        peers: Arc<dyn PeerDirectory>,
        topics: Topics,
        rpc_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            peers,
            topics,
            rpc_timeout,
            cancel,
        }
    }

    /// Subscription filter for an actuator kind.
    pub fn filter(&self, actuator: Actuator) -> String {
        match actuator {
            Actuator::Fan => self.topics.fan_filter(),
            Actuator::Sprinkler => self.topics.sprinkler_filter(),
        }
    }

    fn table(&self, actuator: Actuator) -> &OwnerTable {
        match actuator {
            Actuator::Fan => &self.registry.rooms,
            Actuator::Sprinkler => &self.registry.plants,
        }
    }

    /// Route one control message to the hub owning its room or plant.
    pub async fn dispatch(&self, actuator: Actuator, message: &InboundMessage) -> Result<()> {
        let filter = self.filter(actuator);
        let entity_id = wildcard_segment(&filter, &message.topic)
            .ok_or_else(|| GatewayError::UnexpectedTopic(message.topic.clone()))?;

        let peer_id = self
            .table(actuator)
            .lookup(entity_id)
            .await
            .ok_or_else(|| actuator.no_such(entity_id))?;

        let hub = self
            .peers
            .peer(&peer_id)
            .await
            .ok_or_else(|| actuator.no_such(entity_id))?;

        let state: ActuatorState = serde_json::from_slice(&message.payload)?;

        tracing::debug!(
            "Setting {} of {} to {} on peer {}",
            actuator,
            entity_id,
            state.on,
            peer_id
        );

        let call = async {
            match actuator {
                Actuator::Fan => hub.set_fan_on(entity_id, state.on).await,
                Actuator::Sprinkler => hub.set_sprinkler_on(entity_id, state.on).await,
            }
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(RpcError::Cancelled),
            result = tokio::time::timeout(self.rpc_timeout, call) => {
                result.unwrap_or_else(|_| Err(RpcError::Timeout(self.rpc_timeout.as_secs())))
            }
        };

        Ok(result?)
    }

    /// Drain a subscription until it ends or the gateway is cancelled.
    pub async fn run(&self, actuator: Actuator, mut subscription: Subscription, errors: ErrorReporter) {
        tracing::debug!("Dispatching {} commands from {}", actuator, subscription.filter());

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = subscription.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if let Err(e) = self.dispatch(actuator, &message).await {
                errors.report(e).await;
            }
        }

        tracing::debug!("Dispatch loop for {} stopped", subscription.filter());
    }
}
