//! Error types for the gateway.

use green_guardian_common::{PlantId, RoomId};

use crate::rpc::RpcError;
use crate::transport::TransportError;

/// Errors surfaced by gateway operations.
///
/// Errors from RPC calls into the gateway are returned to the calling hub.
/// Errors raised while dispatching control messages are queued and surface
/// through [`Gateway::wait`](crate::gateway::Gateway::wait).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no such room: {0}")]
    NoSuchRoom(RoomId),

    #[error("no such plant: {0}")]
    NoSuchPlant(PlantId),

    #[error("could not decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("topic {0} does not match any control subscription")]
    UnexpectedTopic(String),

    #[error("gateway is already open")]
    AlreadyOpen,

    #[error("gateway is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
