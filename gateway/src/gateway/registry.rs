//! Ownership tables mapping rooms and plants to the hub that controls them.

use std::collections::HashMap;

use tokio::sync::RwLock;

use green_guardian_common::PeerId;

/// Maps entity IDs of one namespace to the peer that owns them.
///
/// Registration is last-write-wins. There is no reverse index; releasing
/// everything a peer owns scans the table.
#[derive(Debug, Default)]
pub struct OwnerTable {
    owners: RwLock<HashMap<String, PeerId>>,
}

impl OwnerTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Make `peer` the owner of every ID in `ids`, replacing previous owners.
    pub async fn register(&self, ids: &[String], peer: &str) {
        let mut owners = self.owners.write().await;
        for id in ids {
            if let Some(previous) = owners.insert(id.clone(), peer.to_string()) {
                if previous != peer {
                    tracing::debug!("{} moved from peer {} to peer {}", id, previous, peer);
                }
            }
        }
    }

    /// Forget the owners of `ids`. Unknown IDs are ignored.
    pub async fn unregister(&self, ids: &[String]) {
        let mut owners = self.owners.write().await;
        for id in ids {
            owners.remove(id);
        }
    }

    /// Get the owner of an ID.
    pub async fn lookup(&self, id: &str) -> Option<PeerId> {
        self.owners.read().await.get(id).cloned()
    }

    /// Remove every entry owned by `peer`, returning the released IDs.
    pub async fn release_peer(&self, peer: &str) -> Vec<String> {
        let mut released = vec![];
        self.owners.write().await.retain(|id, owner| {
            if owner == peer {
                released.push(id.clone());
                false
            } else {
                true
            }
        });
        released
    }

    /// Count registered IDs.
    pub async fn len(&self) -> usize {
        self.owners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.owners.read().await.is_empty()
    }
}

/// Rooms and plants, each behind its own lock so fan and sprinkler traffic
/// never contend.
#[derive(Debug, Default)]
pub struct Registry {
    /// Room ID to the peer driving its fan.
    pub rooms: OwnerTable,
    /// Plant ID to the peer driving its sprinkler.
    pub plants: OwnerTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let table = OwnerTable::new();
        table.register(&ids(&["room-1", "room-2"]), "p1").await;

        assert_eq!(table.lookup("room-1").await.as_deref(), Some("p1"));
        assert_eq!(table.lookup("room-2").await.as_deref(), Some("p1"));
        assert!(table.lookup("room-3").await.is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let table = OwnerTable::new();
        table.register(&ids(&["room-1"]), "p1").await;
        table.register(&ids(&["room-1"]), "p2").await;

        assert_eq!(table.lookup("room-1").await.as_deref(), Some("p2"));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let table = OwnerTable::new();
        table.register(&ids(&["room-1", "room-2"]), "p1").await;
        table.unregister(&ids(&["room-1", "never-registered"])).await;

        assert!(table.lookup("room-1").await.is_none());
        assert_eq!(table.lookup("room-2").await.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_release_peer() {
        let table = OwnerTable::new();
        table.register(&ids(&["a", "b"]), "p1").await;
        table.register(&ids(&["c"]), "p2").await;

        let mut released = table.release_peer("p1").await;
        released.sort();
        assert_eq!(released, ids(&["a", "b"]));
        assert!(table.lookup("a").await.is_none());
        assert_eq!(table.lookup("c").await.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let registry = Registry::new();
        registry.rooms.register(&ids(&["shared"]), "p1").await;

        assert!(registry.plants.lookup("shared").await.is_none());
        assert!(registry.plants.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_registrations() {
        let table = Arc::new(OwnerTable::new());

        let handles: Vec<_> = (0..16)
            .map(|peer| {
                let table = table.clone();
                tokio::spawn(async move {
                    let keys: Vec<String> =
                        (0..25).map(|i| format!("room-{}-{}", peer, i)).collect();
                    table.register(&keys, &format!("peer-{}", peer)).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(table.len().await, 16 * 25);
        for peer in 0..16 {
            let owner = table.lookup(&format!("room-{}-7", peer)).await;
            assert_eq!(owner, Some(format!("peer-{}", peer)));
        }
    }
}
