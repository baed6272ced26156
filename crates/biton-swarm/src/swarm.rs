//! Swarm orchestrator.
//!
//! `bootstrap` runs one pipeline per transport:
//!
//! ```text
//! discovery ─► dedup ─► feed task ─► [bounded queue] ─► dial loop ─► connect_outbound × N
//! ```
//!
//! The queue decouples discovery from dialing, so a burst of candidates never
//! stalls the traversal behind slow dials. `listen` runs one accept loop per
//! transport and gives every inbound connection its own task.

use std::sync::Arc;
use std::time::Duration;

use biton_core::config::NodeConfig;
use biton_core::infohash::{swarm_address, PROTOCOL_VERSION};
use biton_core::{DiscoveryKey, Keypair, PeerAddress, PeerIdentity, PeerInfo};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::connection::{Connector, ConnectorConfig};
use crate::dedup::dedup;
use crate::discovery::{AddressStream, Discovery};
use crate::error::{Error, Result};
use crate::registry::{Peer, PeerRegistry};
use crate::transport::{Listener, TransportSet};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Immutable swarm parameters, fixed at construction.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub version: String,
    pub network: String,
    pub path: String,
    pub seed: String,
    pub listen_host: String,
    /// 0 = OS-assigned.
    pub listen_port: u16,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    pub queue_depth: usize,
    pub max_inflight: usize,
    pub liveness_probe: bool,
    pub hairpin_host: Option<String>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self::from_node_config(&NodeConfig::default())
    }
}

impl SwarmConfig {
    pub fn from_node_config(config: &NodeConfig) -> Self {
        Self {
            version: PROTOCOL_VERSION.into(),
            network: config.swarm.network.clone(),
            path: config.swarm.path.clone(),
            seed: config.swarm.seed.clone(),
            listen_host: config.transport.host.clone(),
            listen_port: config.transport.port,
            dial_timeout: Duration::from_millis(config.swarm.dial_timeout_ms),
            handshake_timeout: Duration::from_millis(config.swarm.handshake_timeout_ms),
            queue_depth: config.swarm.queue_depth,
            max_inflight: config.swarm.max_inflight,
            liveness_probe: config.swarm.liveness_probe,
            hairpin_host: config.debug.hairpin_host.clone(),
        }
    }

    fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            dial_timeout: self.dial_timeout,
            handshake_timeout: self.handshake_timeout,
            liveness_probe: self.liveness_probe,
            hairpin_host: self.hairpin_host.clone(),
        }
    }
}

pub struct Swarm {
    config: SwarmConfig,
    identity: PeerIdentity,
    transports: TransportSet,
    discovery: Arc<dyn Discovery>,
    connector: Arc<Connector>,
}

impl Swarm {
    pub fn new(
        config: SwarmConfig,
        keypair: Arc<Keypair>,
        transports: TransportSet,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let identity = keypair.identity();
        let connector = Arc::new(Connector::new(
            keypair,
            transports.clone(),
            PeerRegistry::new(),
            config.connector_config(),
        ));
        Self {
            config,
            identity,
            transports,
            discovery,
            connector,
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// `"<version>:<network>:<path>:<seed>"`.
    pub fn address(&self) -> String {
        swarm_address(
            &self.config.version,
            &self.config.network,
            &self.config.path,
            &self.config.seed,
        )
    }

    /// Key this swarm is announced under on `transport`.
    pub fn discovery_key(&self, transport: &str) -> DiscoveryKey {
        DiscoveryKey::for_transport(transport, &self.address())
    }

    pub fn registry(&self) -> &PeerRegistry {
        self.connector.registry()
    }

    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.registry().list()
    }

    /// Dial a single address outside of discovery.
    pub async fn connect(&self, address: &PeerAddress) -> Result<Peer> {
        self.connector.connect_outbound(address).await
    }

    /// Bind every transport and start accepting. Returns the bound addresses.
    ///
    /// Accept loops keep running in the background until `shutdown` fires.
    pub async fn listen(&self, shutdown: broadcast::Receiver<()>) -> Result<Vec<PeerAddress>> {
        let mut bound = Vec::new();
        for transport in self.transports.iter() {
            let address = join_host_port(&self.config.listen_host, self.config.listen_port);
            let listener = transport
                .listen(&address)
                .await
                .map_err(|source| Error::Listen {
                    address: address.clone(),
                    source,
                })?;
            let local = listener
                .local_addr()
                .map_err(|source| Error::Listen { address, source })?;

            self.connector.set_listen_port(transport.network(), local.port());
            let public = PeerAddress::new(transport.network(), local.to_string());
            tracing::info!(address = %public, "listening");

            tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.connector),
                shutdown.resubscribe(),
            ));
            bound.push(public);
        }
        Ok(bound)
    }

    /// Discover and dial peers on every transport.
    ///
    /// Returns once every discovery stream has closed and the dials it fed
    /// have finished, or promptly after `shutdown` fires. Only setting up
    /// discovery can fail; individual dials are logged and skipped.
    pub async fn bootstrap(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut pipelines = JoinSet::new();

        for transport in self.transports.iter() {
            let network = transport.network();
            let key = self.discovery_key(network);
            let listen_port = self.connector.listen_port(network).unwrap_or(0);
            tracing::info!(transport = network, info_hash = %key, "bootstrapping");

            let addresses =
                self.discovery
                    .get_peers(shutdown.resubscribe(), network, &key, listen_port)?;
            let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_depth.max(1));

            pipelines.spawn(feed(addresses, queue_tx, shutdown.resubscribe()));
            pipelines.spawn(dial_loop(
                queue_rx,
                Arc::clone(&self.connector),
                self.config.max_inflight.max(1),
                shutdown.resubscribe(),
            ));
        }

        while let Some(joined) = pipelines.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "bootstrap task panicked");
            }
        }
        tracing::info!(peers = self.registry().len(), "bootstrap finished");
        Ok(())
    }
}

/// Move deduplicated candidates onto the dial queue.
///
/// Dropping `queue` on return closes it, which ends the dial loop.
async fn feed(
    addresses: AddressStream,
    queue: mpsc::Sender<PeerAddress>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut addresses = dedup(addresses);
    loop {
        let next = tokio::select! {
            _ = shutdown.recv() => break,
            next = addresses.next() => next,
        };
        let Some(address) = next else { break };

        tokio::select! {
            _ = shutdown.recv() => break,
            sent = queue.send(address) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// Dial queued candidates, at most `max_inflight` at a time.
async fn dial_loop(
    mut queue: mpsc::Receiver<PeerAddress>,
    connector: Arc<Connector>,
    max_inflight: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                queue.close();
                break;
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "dial task panicked");
                }
            }
            next = queue.recv(), if inflight.len() < max_inflight => {
                let Some(address) = next else { break };
                if connector.registry().has_address(&address) {
                    tracing::debug!(%address, "already connected, skipping");
                    continue;
                }
                let connector = Arc::clone(&connector);
                inflight.spawn(async move {
                    // Failures are logged inside the connector.
                    let _ = connector.connect_outbound(&address).await;
                });
            }
        }
    }

    // Every attempt is bounded by its own timeouts.
    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "dial task panicked");
        }
    }
}

async fn accept_loop(
    listener: Listener,
    connector: Arc<Connector>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("accept loop shutting down");
                return;
            }
            accepted = listener.accept() => {
                let (raw, remote) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                tracing::debug!(%remote, "inbound connection");
                let connector = Arc::clone(&connector);
                tokio::spawn(async move {
                    if let Err(e) = connector.accept_inbound(raw).await {
                        tracing::warn!(%remote, error = %e, "inbound handshake failed");
                    }
                });
            }
        }
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
