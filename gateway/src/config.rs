//! Configuration for the gateway.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What happens to the rooms and plants of a hub that disconnects without
/// unregistering them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleRoutePolicy {
    /// Keep the entries; a reconnecting hub overwrites them when it registers again.
    #[default]
    Retain,
    /// Drop every entry owned by the disconnected peer.
    Purge,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Namespace of this instance in every topic path.
    pub thing_name: String,
    /// Upper bound for a single `set_fan_on` / `set_sprinkler_on` call.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Dispatch errors buffered before dispatch loops wait for `wait()`.
    #[serde(default = "default_queue_capacity")]
    pub error_queue_capacity: usize,
    /// Control messages buffered per subscription.
    #[serde(default = "default_queue_capacity")]
    pub subscription_capacity: usize,
    #[serde(default)]
    pub stale_routes: StaleRoutePolicy,
}

impl GatewayConfig {
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            rpc_timeout_secs: default_rpc_timeout(),
            error_queue_capacity: default_queue_capacity(),
            subscription_capacity: default_queue_capacity(),
            stale_routes: StaleRoutePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// 0 = at most once, 1 = at least once, 2 = exactly once.
    #[serde(default)]
    pub qos: u8,
    /// Requests buffered between the client handle and the event loop.
    #[serde(default = "default_queue_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Upper bound for handing a request to the event loop and, for
    /// subscribes, for the broker's SubAck.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            qos: 0,
            channel_capacity: default_queue_capacity(),
            reconnect_delay_secs: default_reconnect_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// WebSocket listener hubs connect to.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rpc_port")]
    pub port: u16,
    /// Token hubs must present in their hello; any hub is accepted when unset.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_hello_timeout")]
    pub hello_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_rpc_port(),
            auth_token: None,
            hello_timeout_secs: default_hello_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_rpc_port() -> u16 {
    1337
}
fn default_hello_timeout() -> u64 {
    10
}
fn default_rpc_timeout() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    64
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "green-guardian-gateway".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Same as [`load`](Self::load) with an explicit file name (extension optional).
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.thing_name.is_empty() {
            return Err(ConfigError::Message(
                "gateway.thing_name cannot be empty".to_string(),
            ));
        }
        if self.gateway.thing_name.contains(&['/', '+', '#'][..]) {
            return Err(ConfigError::Message(format!(
                "gateway.thing_name '{}' cannot contain '/', '+' or '#'",
                self.gateway.thing_name
            )));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Message(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.gateway.rpc_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "gateway.rpc_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "mqtt.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(thing_name: &str) -> Config {
        Config {
            gateway: GatewayConfig::new(thing_name),
            mqtt: MqttConfig::default(),
            rpc: RpcConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_gateway_defaults() {
        let gateway = GatewayConfig::new("gw1");
        assert_eq!(gateway.rpc_timeout_secs, 10);
        assert_eq!(gateway.error_queue_capacity, 64);
        assert_eq!(gateway.stale_routes, StaleRoutePolicy::Retain);
    }

    #[test]
    fn test_mqtt_defaults() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.host, "localhost");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.qos, 0);
    }

    #[test]
    fn test_rpc_defaults() {
        let rpc = RpcConfig::default();
        assert_eq!(rpc.port, 1337);
        assert!(rpc.auth_token.is_none());
    }

    #[test]
    fn test_validate_rejects_wildcards_in_thing_name() {
        assert!(config("gw1").validate().is_ok());
        assert!(config("").validate().is_err());
        assert!(config("gw/1").validate().is_err());
        assert!(config("gw+").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_qos() {
        let mut config = config("gw1");
        config.mqtt.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut rpc_timeout = config("gw1");
        rpc_timeout.gateway.rpc_timeout_secs = 0;
        assert!(rpc_timeout.validate().is_err());

        let mut request_timeout = config("gw1");
        request_timeout.mqtt.request_timeout_secs = 0;
        assert!(request_timeout.validate().is_err());
    }

    #[test]
    fn test_stale_route_policy_parses() {
        let gateway: GatewayConfig =
            serde_json::from_str(r#"{"thing_name":"gw1","stale_routes":"purge"}"#).unwrap();
        assert_eq!(gateway.stale_routes, StaleRoutePolicy::Purge);
        assert_eq!(gateway.subscription_capacity, 64);
    }
}
