//! RPC fabric between the gateway and connected hubs.
//!
//! This module provides:
//! - The peer directory abstraction the dispatcher routes through
//! - The live directory of WebSocket-connected hubs
//! - The WebSocket server hubs connect to

mod peers;
mod ws;

use std::sync::Arc;

use async_trait::async_trait;

use green_guardian_common::PeerId;

pub use peers::{ConnectedHub, HubConnections};
pub use ws::{router, ws_handler, WsState};

/// Errors from calls into a hub.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("peer did not answer within {0}s")]
    Timeout(u64),

    #[error("call cancelled by gateway shutdown")]
    Cancelled,

    #[error("peer returned error: {0}")]
    Remote(String),
}

/// Identity of the hub on the other side of an inbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub peer_id: PeerId,
}

impl CallContext {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
        }
    }
}

/// Actuator methods a hub exposes to the gateway.
#[async_trait]
pub trait HubHandle: Send + Sync {
    async fn set_fan_on(&self, room_id: &str, on: bool) -> Result<(), RpcError>;

    async fn set_sprinkler_on(&self, plant_id: &str, on: bool) -> Result<(), RpcError>;
}

/// Live view of connected hubs by peer ID.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Handle to a connected peer, `None` once it disconnected.
    async fn peer(&self, peer_id: &str) -> Option<Arc<dyn HubHandle>>;
}
