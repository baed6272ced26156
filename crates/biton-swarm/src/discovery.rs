//! Sources of candidate peer addresses.

use std::pin::Pin;

use biton_core::{DiscoveryKey, PeerAddress};
use futures::Stream;
use tokio::sync::broadcast;

use crate::error::Result;

/// A finite stream of candidate addresses.
///
/// May be empty, may repeat itself, may stall between items.
pub type AddressStream = Pin<Box<dyn Stream<Item = PeerAddress> + Send>>;

/// Something that can find other members of a swarm.
pub trait Discovery: Send + Sync + 'static {
    /// Announce `listen_port` under `key` and stream the addresses of other
    /// announcers on `transport`.
    ///
    /// The stream ends by itself once the lookup is exhausted, and promptly
    /// after `shutdown` fires.
    fn get_peers(
        &self,
        shutdown: broadcast::Receiver<()>,
        transport: &str,
        key: &DiscoveryKey,
        listen_port: u16,
    ) -> Result<AddressStream>;
}

/// A fixed address list, yielded once per lookup.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    addresses: Vec<PeerAddress>,
}

impl StaticDiscovery {
    pub fn new(addresses: impl IntoIterator<Item = PeerAddress>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }
}

impl Discovery for StaticDiscovery {
    fn get_peers(
        &self,
        _shutdown: broadcast::Receiver<()>,
        transport: &str,
        _key: &DiscoveryKey,
        _listen_port: u16,
    ) -> Result<AddressStream> {
        let matching: Vec<PeerAddress> = self
            .addresses
            .iter()
            .filter(|a| a.transport == transport)
            .cloned()
            .collect();
        Ok(Box::pin(futures::stream::iter(matching)))
    }
}
