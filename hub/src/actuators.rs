//! Hardware seams of the hub: actuators driven by the gateway, sensors read
//! for measurements.

use async_trait::async_trait;

use crate::error::ActuatorError;

/// Fans and sprinklers the gateway switches through `set_*_on` calls.
#[async_trait]
pub trait Actuators: Send + Sync {
    async fn set_fan_on(&self, room_id: &str, on: bool) -> Result<(), ActuatorError>;

    async fn set_sprinkler_on(&self, plant_id: &str, on: bool) -> Result<(), ActuatorError>;
}

/// Current readings, in the same units as their configured defaults.
pub trait Sensors: Send + Sync {
    fn temperature(&self, room_id: &str) -> i64;

    fn moisture(&self, plant_id: &str) -> i64;
}
