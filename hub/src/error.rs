//! Error types for the hub.

use green_guardian_common::{PlantId, RoomId};

/// Failures of the gateway connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Gateway rejected hello: {code} - {message}")]
    Rejected { code: String, message: String },

    #[error("Gateway did not answer hello within {0}s")]
    HandshakeTimeout(u64),

    #[error("Unexpected frame during handshake: {0}")]
    UnexpectedFrame(String),

    #[error("Connection closed")]
    Closed,
}

/// Failures applying a control command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("no fan in room {0}")]
    UnknownRoom(RoomId),

    #[error("no sprinkler for plant {0}")]
    UnknownPlant(PlantId),
}
