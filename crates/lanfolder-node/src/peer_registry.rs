//! Peer registry -- thread-safe map of PeerId to the addresses seen for it.
//!
//! Records are created on first sight of a PeerId and live for the node's
//! lifetime. An address is stored at most once per peer; insertion order is
//! kept for diagnostics only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lanfolder_protocol::PeerId;
use tokio::sync::RwLock;

/// Everything known about one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Distinct addresses in the order they were first seen.
    pub addrs: Vec<SocketAddr>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// What a `register` call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    NewPeer,
    NewAddress,
    Known,
}

#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: add `addr` to the peer's address set, creating the record
    /// if the peer is new.
    pub async fn register(&self, peer_id: &PeerId, addr: SocketAddr) -> Registration {
        let now = Utc::now();
        let (outcome, pool_size) = {
            let mut peers = self.inner.write().await;
            let outcome = match peers.get_mut(peer_id) {
                Some(record) => {
                    record.last_seen = now;
                    if record.addrs.contains(&addr) {
                        Registration::Known
                    } else {
                        record.addrs.push(addr);
                        Registration::NewAddress
                    }
                }
                None => {
                    peers.insert(
                        peer_id.clone(),
                        PeerRecord {
                            peer_id: peer_id.clone(),
                            addrs: vec![addr],
                            first_seen: now,
                            last_seen: now,
                        },
                    );
                    Registration::NewPeer
                }
            };
            (outcome, peers.len())
        };

        match outcome {
            Registration::NewPeer => {
                tracing::info!(peer = %peer_id, %addr, pool_size, "registry: peer added");
            }
            Registration::NewAddress => {
                tracing::info!(peer = %peer_id, %addr, "registry: new address for peer");
            }
            Registration::Known => {}
        }
        outcome
    }

    /// Get a clone of a peer record.
    pub async fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.inner.read().await.get(peer_id).cloned()
    }

    pub async fn addresses(&self, peer_id: &PeerId) -> Vec<SocketAddr> {
        self.inner
            .read()
            .await
            .get(peer_id)
            .map(|r| r.addrs.clone())
            .unwrap_or_default()
    }

    /// All known peers.
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
