//! Peer registry: every peer that completed a handshake, keyed on identity.
//!
//! Shared between the dial tasks, the accept tasks, and readers of the peer
//! list. A single reader/writer lock guards the map: only `upsert` takes it
//! exclusively, so readers always see whole entries.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use biton_core::{PeerAddress, PeerIdentity, PeerInfo};
use tokio::sync::Mutex;

use crate::noise::NoiseStream;
use crate::transport::RawConn;

/// An authenticated connection, shared between the registry and its users.
pub type SharedConnection = Arc<Mutex<NoiseStream<RawConn>>>;

/// A registered peer and its most recent connection.
#[derive(Clone)]
pub struct Peer {
    pub info: PeerInfo,
    pub connection: SharedConnection,
}

impl Peer {
    pub fn new(info: PeerInfo, connection: NoiseStream<RawConn>) -> Self {
        Self {
            info,
            connection: Arc::new(Mutex::new(connection)),
        }
    }
}

#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<PeerIdentity, Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `peer`, or merge it into the entry with the same identity.
    ///
    /// On merge the stored addresses keep their order and new ones are
    /// appended. The incoming connection always replaces the stored one, and
    /// the replaced connection is shut down after the lock is released.
    ///
    /// Returns the entry as stored.
    pub async fn upsert(&self, peer: Peer) -> Peer {
        let (stored, superseded) = {
            let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            match peers.get_mut(&peer.info.identity) {
                Some(existing) => {
                    existing.info.merge(&peer.info);
                    let old = std::mem::replace(&mut existing.connection, peer.connection);
                    let superseded = (!Arc::ptr_eq(&old, &existing.connection)).then_some(old);
                    (existing.clone(), superseded)
                }
                None => {
                    peers.insert(peer.info.identity.clone(), peer.clone());
                    (peer, None)
                }
            }
        };

        if let Some(old) = superseded {
            tracing::debug!(peer = %stored.info.identity, "closing superseded connection");
            if let Err(e) = old.lock().await.shutdown().await {
                tracing::debug!(peer = %stored.info.identity, error = %e, "superseded connection already gone");
            }
        }
        stored
    }

    /// Snapshot of every registered peer. Order is unspecified.
    pub fn list(&self) -> Vec<PeerInfo> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.values().map(|p| p.info.clone()).collect()
    }

    /// True if any registered peer is known to be reachable at `address`.
    pub fn has_address(&self, address: &PeerAddress) -> bool {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.values().any(|p| p.info.has_address(address))
    }

    pub fn get(&self, identity: &PeerIdentity) -> Option<Peer> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
