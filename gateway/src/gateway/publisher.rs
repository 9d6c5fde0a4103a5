//! Forwarding of hub measurements onto the broker.

use std::sync::Arc;

use green_guardian_common::Measurement;

use crate::error::Result;
use crate::transport::PubSub;

use super::Topics;

/// Publishes measurements reported by hubs.
///
/// Forwarding never consults the registry: a hub may report for a room or
/// plant nobody registered.
pub struct Publisher {
    transport: Arc<dyn PubSub>,
    topics: Topics,
}

impl Publisher {
    pub fn new(transport: Arc<dyn PubSub>, topics: Topics) -> Self {
        Self { transport, topics }
    }

    /// Publish a temperature reading for a room.
    pub async fn forward_temperature(
        &self,
        room_id: &str,
        measurement: i64,
        default_value: i64,
    ) -> Result<()> {
        let topic = self.topics.temperature(room_id);
        self.forward(&topic, Measurement::new(measurement, default_value))
            .await
    }

    /// Publish a moisture reading for a plant.
    pub async fn forward_moisture(
        &self,
        plant_id: &str,
        measurement: i64,
        default_value: i64,
    ) -> Result<()> {
        let topic = self.topics.moisture(plant_id);
        self.forward(&topic, Measurement::new(measurement, default_value))
            .await
    }

    async fn forward(&self, topic: &str, measurement: Measurement) -> Result<()> {
        let payload = serde_json::to_vec(&measurement)?;
        self.transport.publish(topic, payload).await?;
        tracing::trace!("Published {:?} to {}", measurement, topic);
        Ok(())
    }
}
