pub mod actuators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod simulation;

pub use actuators::{Actuators, Sensors};
pub use config::{Config, GatewayConfig, HubConfig, SensorsConfig};
pub use error::{ActuatorError, ClientError};
pub use gateway::GatewayClient;
pub use simulation::SimulatedGreenhouse;
