//! Configuration for the hub.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use green_guardian_common::{PlantId, RoomId};

/// Main configuration structure for the hub.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hub: HubConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
}

/// What this hub owns.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub name: String,
    #[serde(default)]
    pub rooms: Vec<RoomId>,
    #[serde(default)]
    pub plants: Vec<PlantId>,
}

/// Gateway WebSocket connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub ws_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_measurement_interval")]
    pub measurement_interval_secs: u64,
}

/// Baselines the simulated sensors report around.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_temperature")]
    pub default_temperature: i64,
    #[serde(default = "default_moisture")]
    pub default_moisture: i64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            default_temperature: default_temperature(),
            default_moisture: default_moisture(),
        }
    }
}

// Default values
fn default_reconnect_delay() -> u64 {
    5
}
fn default_measurement_interval() -> u64 {
    10
}
fn default_temperature() -> i64 {
    20
}
fn default_moisture() -> i64 {
    50
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (HUB__SECTION__KEY format, lists comma separated)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("HUB")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("hub.rooms")
                    .with_list_parse_key("hub.plants")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        if config.hub.name.is_empty() {
            return Err(ConfigError::Message("hub.name cannot be empty".to_string()));
        }
        Ok(config)
    }
}
