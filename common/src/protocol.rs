//! WebSocket protocol types for hub-gateway communication.
//!
//! This module defines the RPC fabric between hubs and the gateway.
//!
//! # Protocol Overview
//!
//! The protocol uses JSON-encoded messages over WebSocket. Each message has a `type` field
//! that determines its structure. Both sides may issue calls; every `call` is answered by
//! exactly one `return` carrying the same `call_id`.
//!
//! ## Connection Flow
//!
//! 1. Hub connects to the gateway WebSocket endpoint
//! 2. Hub sends `Hello` with its name, protocol version and optional auth token
//! 3. Gateway responds with `Welcome` carrying the peer ID assigned to this connection,
//!    or `Error` on failure
//! 4. Hub calls `RegisterFans` / `RegisterSprinklers` for the rooms and plants it owns
//! 5. Hub periodically calls `ForwardTemperatureMeasurement` / `ForwardMoistureMeasurement`
//! 6. Gateway calls `SetFanOn` / `SetSprinklerOn` when control messages arrive over MQTT
//!
//! Peer IDs are only valid for the lifetime of one connection; a reconnecting hub gets a
//! fresh one and must register again.

use serde::{Deserialize, Serialize};

/// Identifier of a room, unique among rooms.
pub type RoomId = String;
/// Identifier of a plant, unique among plants.
pub type PlantId = String;
/// Identifier the gateway assigns to a connected hub.
pub type PeerId = String;

/// Protocol version constant.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from hub to gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Initial handshake when connecting.
    Hello(HubHello),
    /// Invoke a gateway method.
    Call(GatewayRequest),
    /// Result of a gateway-issued call.
    Return(CallReturn),
}

/// Messages sent from gateway to hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Handshake accepted.
    Welcome { peer_id: PeerId },
    /// Invoke a hub method.
    Call(HubRequest),
    /// Result of a hub-issued call.
    Return(CallReturn),
    /// Protocol failure; the gateway closes the connection afterwards.
    Error { code: String, message: String },
}

/// Handshake data sent on connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubHello {
    /// Human-readable hub name, used in logs.
    pub name: String,
    /// Protocol version for compatibility checking.
    pub protocol_version: u32,
    /// Authentication token, required when the gateway has one configured.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Methods a hub can invoke on the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum GatewayCall {
    RegisterFans {
        room_ids: Vec<RoomId>,
    },
    UnregisterFans {
        room_ids: Vec<RoomId>,
    },
    RegisterSprinklers {
        plant_ids: Vec<PlantId>,
    },
    UnregisterSprinklers {
        plant_ids: Vec<PlantId>,
    },
    ForwardTemperatureMeasurement {
        room_id: RoomId,
        measurement: i64,
        default_value: i64,
    },
    ForwardMoistureMeasurement {
        plant_id: PlantId,
        measurement: i64,
        default_value: i64,
    },
}

/// Methods the gateway can invoke on a hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum HubCall {
    SetFanOn { room_id: RoomId, on: bool },
    SetSprinklerOn { plant_id: PlantId, on: bool },
}

/// A call from a hub to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub call_id: u64,
    pub call: GatewayCall,
}

/// A call from the gateway to a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRequest {
    pub call_id: u64,
    pub call: HubCall,
}

/// Outcome of a call. `error` is absent on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReturn {
    pub call_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HubHello {
    pub fn new(name: String, auth_token: Option<String>) -> Self {
        Self {
            name,
            protocol_version: PROTOCOL_VERSION,
            auth_token,
        }
    }
}

impl GatewayCall {
    /// Wire name of the method, for logging.
    pub fn method(&self) -> &'static str {
        match self {
            GatewayCall::RegisterFans { .. } => "register_fans",
            GatewayCall::UnregisterFans { .. } => "unregister_fans",
            GatewayCall::RegisterSprinklers { .. } => "register_sprinklers",
            GatewayCall::UnregisterSprinklers { .. } => "unregister_sprinklers",
            GatewayCall::ForwardTemperatureMeasurement { .. } => "forward_temperature_measurement",
            GatewayCall::ForwardMoistureMeasurement { .. } => "forward_moisture_measurement",
        }
    }
}

impl CallReturn {
    pub fn ok(call_id: u64) -> Self {
        Self {
            call_id,
            error: None,
        }
    }

    pub fn err(call_id: u64, error: impl Into<String>) -> Self {
        Self {
            call_id,
            error: Some(error.into()),
        }
    }

    /// Convert into a `Result`, keeping the remote error message.
    pub fn into_result(self) -> Result<(), String> {
        match self.error {
            None => Ok(()),
            Some(message) => Err(message),
        }
    }
}
