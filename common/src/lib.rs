//! Green Guardian Common Types
//!
//! Shared types used by both the hub and the gateway.

pub mod protocol;
pub mod telemetry;

pub use protocol::{
    CallReturn, GatewayCall, GatewayMessage, GatewayRequest, HubCall, HubHello, HubMessage,
    HubRequest, PeerId, PlantId, RoomId, PROTOCOL_VERSION,
};
pub use telemetry::{ActuatorState, Measurement};
