use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use green_guardian_common::HubCall;

use crate::rpc::{HubHandle, PeerDirectory, RpcError};

/// Hub double recording every actuator call.
pub struct MockHub {
    calls: Mutex<Vec<HubCall>>,
    count: watch::Sender<usize>,
    error: Option<String>,
    delay: Option<Duration>,
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHub {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            count: watch::Sender::new(0),
            error: None,
            delay: None,
        }
    }

    /// A hub answering every call with `error`.
    pub fn failing(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new()
        }
    }

    /// A hub that takes `delay` to answer.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<HubCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` calls were received, panicking after five seconds.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for hub calls")
            .expect("call counter dropped");
    }

    async fn record(&self, call: HubCall) -> Result<(), RpcError> {
        self.calls.lock().unwrap().push(call);
        self.count.send_modify(|count| *count += 1);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(error) => Err(RpcError::Remote(error.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HubHandle for MockHub {
    async fn set_fan_on(&self, room_id: &str, on: bool) -> Result<(), RpcError> {
        self.record(HubCall::SetFanOn {
            room_id: room_id.to_string(),
            on,
        })
        .await
    }

    async fn set_sprinkler_on(&self, plant_id: &str, on: bool) -> Result<(), RpcError> {
        self.record(HubCall::SetSprinklerOn {
            plant_id: plant_id.to_string(),
            on,
        })
        .await
    }
}

/// Peer directory backed by a plain map of mock hubs.
#[derive(Default)]
pub struct MockPeers {
    peers: RwLock<HashMap<String, Arc<MockHub>>>,
}

impl MockPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, peer_id: &str, hub: Arc<MockHub>) {
        self.peers.write().await.insert(peer_id.to_string(), hub);
    }

    pub async fn remove(&self, peer_id: &str) {
        self.peers.write().await.remove(peer_id);
    }
}

#[async_trait]
impl PeerDirectory for MockPeers {
    async fn peer(&self, peer_id: &str) -> Option<Arc<dyn HubHandle>> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .map(|hub| hub.clone() as Arc<dyn HubHandle>)
    }
}
