//! BitTorrent Mainline DHT as a discovery source.
//!
//! The `mainline` client is blocking, so announce and traversal each run on
//! the blocking pool and hand results back through a bounded channel.

use std::io;
use std::sync::Arc;

use biton_core::{DiscoveryKey, PeerAddress};
use futures::StreamExt;
use ::mainline::{Dht, Id};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::discovery::{AddressStream, Discovery};
use crate::error::{Error, Result};

/// Client prefix of DHT node ids.
const NODE_ID_PREFIX: &[u8; 8] = b"-WW0102-";

/// Candidates buffered between the traversal worker and the consumer.
const DEFAULT_BUFFER: usize = 64;

/// DHT node id for a node: the client prefix followed by the leading bytes of
/// its public key.
pub fn mainline_node_id(public: &[u8; 32]) -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..NODE_ID_PREFIX.len()].copy_from_slice(NODE_ID_PREFIX);
    id[NODE_ID_PREFIX.len()..].copy_from_slice(&public[..20 - NODE_ID_PREFIX.len()]);
    id
}

#[derive(Clone)]
pub struct MainlineDiscovery {
    dht: Arc<Dht>,
    buffer: usize,
}

impl MainlineDiscovery {
    pub fn new(dht: Arc<Dht>) -> Self {
        Self {
            dht,
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Start a DHT node on `port`. An empty `bootstrap` uses the crate's
    /// default bootstrap nodes.
    pub fn bind(port: u16, bootstrap: &[String]) -> Result<Self> {
        let mut builder = Dht::builder();
        builder.port(port);
        if !bootstrap.is_empty() {
            builder.bootstrap(bootstrap);
        }
        let dht = builder.build().map_err(Error::Discovery)?;
        Ok(Self::new(Arc::new(dht)))
    }
}

impl Discovery for MainlineDiscovery {
    fn get_peers(
        &self,
        mut shutdown: broadcast::Receiver<()>,
        transport: &str,
        key: &DiscoveryKey,
        listen_port: u16,
    ) -> Result<AddressStream> {
        let info_hash = Id::from_bytes(key.as_bytes())
            .map_err(|e| Error::Discovery(io::Error::other(format!("{e:?}"))))?;
        let (tx, rx) = mpsc::channel(self.buffer);

        if listen_port != 0 {
            let dht = Arc::clone(&self.dht);
            let info_hash_hex = key.to_string();
            tokio::task::spawn_blocking(move || match dht.announce_peer(info_hash, Some(listen_port)) {
                Ok(_) => tracing::debug!(info_hash = %info_hash_hex, port = listen_port, "announced"),
                Err(e) => tracing::warn!(info_hash = %info_hash_hex, error = ?e, "announce failed"),
            });
        }

        let dht = Arc::clone(&self.dht);
        let transport = transport.to_owned();
        let info_hash_hex = key.to_string();
        tokio::task::spawn_blocking(move || {
            let mut found = 0usize;
            for batch in dht.get_peers(info_hash) {
                // The consumer dropped the stream, either on shutdown or because it is done.
                if tx.is_closed() {
                    tracing::debug!(info_hash = %info_hash_hex, found, "traversal cancelled");
                    return;
                }
                for addr in batch {
                    tracing::trace!(info_hash = %info_hash_hex, %addr, "candidate");
                    if tx
                        .blocking_send(PeerAddress::new(transport.as_str(), addr.to_string()))
                        .is_err()
                    {
                        return;
                    }
                    found += 1;
                }
            }
            tracing::debug!(info_hash = %info_hash_hex, found, "traversal finished");
        });

        // Ends when the traversal drops `tx`, or as soon as shutdown fires.
        let stream = ReceiverStream::new(rx).take_until(async move {
            let _ = shutdown.recv().await;
        });
        Ok(Box::pin(stream))
    }
}
