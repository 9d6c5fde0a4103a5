//! In-process greenhouse standing in for real hardware.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::Rng;

use green_guardian_common::{PlantId, RoomId};

use crate::actuators::{Actuators, Sensors};
use crate::config::{HubConfig, SensorsConfig};
use crate::error::ActuatorError;

/// Degrees a running fan takes off a room.
const FAN_COOLING: i64 = 3;
/// Points a running sprinkler adds to a plant's moisture.
const SPRINKLER_WETTING: i64 = 15;
const NOISE: i64 = 2;

/// Fans and sprinklers for the configured rooms and plants, all off at start.
///
/// Readings jitter around the configured defaults and follow the actuators.
pub struct SimulatedGreenhouse {
    sensors: SensorsConfig,
    fans: Mutex<HashMap<RoomId, bool>>,
    sprinklers: Mutex<HashMap<PlantId, bool>>,
}

impl SimulatedGreenhouse {
    pub fn new(hub: &HubConfig, sensors: SensorsConfig) -> Self {
        let off = |ids: &[String]| -> HashMap<String, bool> {
            ids.iter().map(|id| (id.clone(), false)).collect()
        };
        Self {
            sensors,
            fans: Mutex::new(off(&hub.rooms)),
            sprinklers: Mutex::new(off(&hub.plants)),
        }
    }

    /// State of the fan in `room_id`, `None` for a room this hub does not own.
    pub fn fan_on(&self, room_id: &str) -> Option<bool> {
        lock(&self.fans).get(room_id).copied()
    }

    /// State of the sprinkler of `plant_id`, `None` for a plant this hub does not own.
    pub fn sprinkler_on(&self, plant_id: &str) -> Option<bool> {
        lock(&self.sprinklers).get(plant_id).copied()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set a device, returning its previous state.
fn switch(devices: &Mutex<HashMap<String, bool>>, id: &str, on: bool) -> Option<bool> {
    lock(devices)
        .get_mut(id)
        .map(|state| std::mem::replace(state, on))
}

fn noise() -> i64 {
    rand::thread_rng().gen_range(-NOISE..=NOISE)
}

#[async_trait]
impl Actuators for SimulatedGreenhouse {
    async fn set_fan_on(&self, room_id: &str, on: bool) -> Result<(), ActuatorError> {
        let was = switch(&self.fans, room_id, on)
            .ok_or_else(|| ActuatorError::UnknownRoom(room_id.to_string()))?;
        if was != on {
            tracing::info!("Fan in room {} turned {}", room_id, if on { "on" } else { "off" });
        }
        Ok(())
    }

    async fn set_sprinkler_on(&self, plant_id: &str, on: bool) -> Result<(), ActuatorError> {
        let was = switch(&self.sprinklers, plant_id, on)
            .ok_or_else(|| ActuatorError::UnknownPlant(plant_id.to_string()))?;
        if was != on {
            tracing::info!(
                "Sprinkler for plant {} turned {}",
                plant_id,
                if on { "on" } else { "off" }
            );
        }
        Ok(())
    }
}

impl Sensors for SimulatedGreenhouse {
    fn temperature(&self, room_id: &str) -> i64 {
        let cooling = if self.fan_on(room_id) == Some(true) {
            FAN_COOLING
        } else {
            0
        };
        self.sensors.default_temperature - cooling + noise()
    }

    fn moisture(&self, plant_id: &str) -> i64 {
        let wetting = if self.sprinkler_on(plant_id) == Some(true) {
            SPRINKLER_WETTING
        } else {
            0
        };
        self.sensors.default_moisture + wetting + noise()
    }
}
