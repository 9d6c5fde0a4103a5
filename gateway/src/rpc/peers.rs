//! Directory of hubs connected over WebSocket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, RwLock};

use green_guardian_common::{CallReturn, GatewayMessage, HubCall, HubRequest, PeerId};

use super::{HubHandle, PeerDirectory, RpcError};

type PendingCalls = Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>;

/// Information about a connected hub.
pub struct ConnectedHub {
    /// Peer ID assigned on connection.
    pub peer_id: PeerId,
    /// Name the hub announced in its hello.
    pub name: String,
    /// When the hub connected.
    pub connected_at: DateTime<Utc>,
    /// Channel to send messages to this hub.
    tx: mpsc::Sender<GatewayMessage>,
    next_call_id: AtomicU64,
    pending: PendingCalls,
}

/// Removes a pending call when the caller stops waiting for it.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    call_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.call_id);
    }
}

impl ConnectedHub {
    pub fn new(peer_id: PeerId, name: String, tx: mpsc::Sender<GatewayMessage>) -> Self {
        Self {
            peer_id,
            name,
            connected_at: Utc::now(),
            tx,
            next_call_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke a method on the hub and wait for its return.
    pub async fn call(&self, call: HubCall) -> Result<(), RpcError> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(call_id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            call_id,
        };

        self.tx
            .send(GatewayMessage::Call(HubRequest { call_id, call }))
            .await
            .map_err(|_| RpcError::Disconnected)?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(RpcError::Remote(message)),
            Err(_) => Err(RpcError::Disconnected),
        }
    }

    /// Hand a `return` frame to the call waiting for it.
    pub fn complete(&self, ret: CallReturn) {
        let call_id = ret.call_id;
        match self.lock_pending().remove(&call_id) {
            Some(waiter) => {
                let _ = waiter.send(ret.into_result());
            }
            None => {
                tracing::debug!(
                    "Discarding return for unknown call {} from {}",
                    call_id,
                    self.peer_id
                );
            }
        }
    }

    /// Fail every call still waiting for a return.
    pub fn fail_pending(&self) {
        let pending = std::mem::take(&mut *self.lock_pending());
        if !pending.is_empty() {
            tracing::debug!(
                "Dropping {} pending calls to {}",
                pending.len(),
                self.peer_id
            );
        }
    }

    /// Count calls waiting for a return.
    pub fn pending_calls(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<(), String>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HubHandle for ConnectedHub {
    async fn set_fan_on(&self, room_id: &str, on: bool) -> Result<(), RpcError> {
        self.call(HubCall::SetFanOn {
            room_id: room_id.to_string(),
            on,
        })
        .await
    }

    async fn set_sprinkler_on(&self, plant_id: &str, on: bool) -> Result<(), RpcError> {
        self.call(HubCall::SetSprinklerOn {
            plant_id: plant_id.to_string(),
            on,
        })
        .await
    }
}

/// Registry of connected hubs.
#[derive(Default)]
pub struct HubConnections {
    hubs: RwLock<HashMap<PeerId, Arc<ConnectedHub>>>,
}

impl HubConnections {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new hub.
    pub async fn insert(&self, hub: Arc<ConnectedHub>) {
        self.hubs.write().await.insert(hub.peer_id.clone(), hub);
    }

    /// Remove a hub from the registry.
    pub async fn remove(&self, peer_id: &str) -> Option<Arc<ConnectedHub>> {
        self.hubs.write().await.remove(peer_id)
    }

    /// Get a hub by peer ID.
    pub async fn get(&self, peer_id: &str) -> Option<Arc<ConnectedHub>> {
        self.hubs.read().await.get(peer_id).cloned()
    }

    /// Count connected hubs.
    pub async fn count(&self) -> usize {
        self.hubs.read().await.len()
    }
}

#[async_trait]
impl PeerDirectory for HubConnections {
    async fn peer(&self, peer_id: &str) -> Option<Arc<dyn HubHandle>> {
        self.get(peer_id)
            .await
            .map(|hub| hub as Arc<dyn HubHandle>)
    }
}
