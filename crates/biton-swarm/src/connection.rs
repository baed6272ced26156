//! Connection lifecycle: raw connection → Noise handshake → identity → registry.
//!
//! ```text
//! Idle ─► HandshakeInProgress ─► Identified ─► Registered
//!                  │                  │
//!                  └──────► Failed ◄──┘
//! ```
//!
//! Outbound attempts know the address they dialed and record it on the peer.
//! Inbound attempts start with no addresses; the socket's remote address may
//! be behind NAT and is never treated as connectable.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use biton_core::{Keypair, PeerAddress, PeerInfo};

use crate::error::{DialError, Error, HandshakeError, Result};
use crate::hairpin;
use crate::noise::{ChannelBinding, ConnectionState, NoiseStream};
use crate::registry::{Peer, PeerRegistry};
use crate::transport::{RawConn, TransportSet};

/// Marker the dialer sends once the handshake completes.
pub const PROBE: &[u8; 4] = b"ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    HandshakeInProgress,
    Identified,
    Registered,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Idle => "idle",
            Stage::HandshakeInProgress => "handshake",
            Stage::Identified => "identified",
            Stage::Registered => "registered",
            Stage::Failed => "failed",
        })
    }
}

/// Extract the remote's static public key from a finished handshake.
pub fn peer_public_key_from_state(state: &ConnectionState) -> Result<[u8; 32], HandshakeError> {
    let raw = state
        .channel_binding
        .as_deref()
        .ok_or(HandshakeError::MissingState)?;
    let binding: ChannelBinding =
        serde_json::from_slice(raw).map_err(HandshakeError::MalformedState)?;
    let len = binding.peer_public.len();
    binding
        .peer_public
        .try_into()
        .map_err(|_| HandshakeError::BadPublicKey(len))
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Bounds opening the raw transport connection.
    pub dial_timeout: Duration,
    /// Bounds the handshake and liveness probe, in both directions.
    pub handshake_timeout: Duration,
    pub liveness_probe: bool,
    pub hairpin_host: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            liveness_probe: true,
            hairpin_host: None,
        }
    }
}

/// Turns addresses and accepted connections into registered peers.
///
/// Every attempt is independent: a failure is returned to the caller and
/// leaves the registry untouched.
pub struct Connector {
    keypair: Arc<Keypair>,
    transports: TransportSet,
    registry: PeerRegistry,
    config: ConnectorConfig,
    listen_ports: RwLock<HashMap<String, u16>>,
}

impl Connector {
    pub fn new(
        keypair: Arc<Keypair>,
        transports: TransportSet,
        registry: PeerRegistry,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            keypair,
            transports,
            registry,
            config,
            listen_ports: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Record the port we listen on for `network`, used to spot self-dials.
    pub fn set_listen_port(&self, network: &str, port: u16) {
        self.listen_ports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(network.to_owned(), port);
    }

    pub fn listen_port(&self, network: &str) -> Option<u16> {
        self.listen_ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .copied()
    }

    /// Dial `addr`, authenticate, and register the peer under that address.
    pub async fn connect_outbound(&self, addr: &PeerAddress) -> Result<Peer> {
        let mut stage = Stage::Idle;
        let result = self.outbound(addr, &mut stage).await;
        if let Err(e) = &result {
            tracing::debug!(%addr, at = %stage, stage = %Stage::Failed, error = %e, "outbound attempt failed");
        }
        result
    }

    async fn outbound(&self, addr: &PeerAddress, stage: &mut Stage) -> Result<Peer> {
        let transport = self
            .transports
            .get(&addr.transport)
            .ok_or_else(|| DialError::UnknownTransport(addr.transport.clone()))?;

        let target = hairpin::dial_target(
            self.config.hairpin_host.as_deref(),
            self.listen_port(&addr.transport),
            addr,
        )?;

        let raw = bounded(self.config.dial_timeout, transport.dial(&target)).await??;

        *stage = Stage::HandshakeInProgress;
        tracing::trace!(%addr, %stage);
        let keypair = Arc::clone(&self.keypair);
        let probe = self.config.liveness_probe;
        let (stream, public) = bounded(self.config.handshake_timeout, async move {
            let mut stream = NoiseStream::initiate(raw, &keypair).await?;
            let public = peer_public_key_from_state(stream.connection_state())?;
            if probe {
                stream
                    .send(PROBE)
                    .await
                    .map_err(|e| HandshakeError::Probe(e.to_string()))?;
            }
            Ok::<_, HandshakeError>((stream, public))
        })
        .await??;

        *stage = Stage::Identified;
        let info = PeerInfo::new(public).with_address(addr.clone());
        if info.identity == self.keypair.identity() {
            return Err(DialError::SelfDial(addr.to_string()).into());
        }
        tracing::trace!(%addr, peer = %info.identity, %stage);

        let peer = self.registry.upsert(Peer::new(info, stream)).await;
        *stage = Stage::Registered;
        tracing::info!(%addr, peer = %peer.info.identity, "outbound peer registered");
        Ok(peer)
    }

    /// Authenticate an accepted connection and register the peer with no
    /// known addresses.
    pub async fn accept_inbound(&self, raw: RawConn) -> Result<Peer> {
        let mut stage = Stage::HandshakeInProgress;
        let result = self.inbound(raw, &mut stage).await;
        if let Err(e) = &result {
            tracing::debug!(at = %stage, stage = %Stage::Failed, error = %e, "inbound attempt failed");
        }
        result
    }

    async fn inbound(&self, raw: RawConn, stage: &mut Stage) -> Result<Peer> {
        let keypair = Arc::clone(&self.keypair);
        let probe = self.config.liveness_probe;
        let (stream, public) = bounded(self.config.handshake_timeout, async move {
            let mut stream = NoiseStream::respond(raw, &keypair).await?;
            let public = peer_public_key_from_state(stream.connection_state())?;
            if probe {
                let marker = stream
                    .recv()
                    .await
                    .map_err(|e| HandshakeError::Probe(e.to_string()))?;
                if marker != PROBE {
                    return Err(HandshakeError::Probe(format!(
                        "unexpected marker {}",
                        hex::encode(&marker)
                    )));
                }
            }
            Ok::<_, HandshakeError>((stream, public))
        })
        .await??;

        *stage = Stage::Identified;
        let info = PeerInfo::new(public);
        if info.identity == self.keypair.identity() {
            return Err(HandshakeError::SelfConnection.into());
        }
        let peer = self.registry.upsert(Peer::new(info, stream)).await;
        *stage = Stage::Registered;
        tracing::info!(peer = %peer.info.identity, "inbound peer registered");
        Ok(peer)
    }
}

/// Run `fut` with a deadline, mapping expiry to [`Error::Timeout`].
async fn bounded<F: Future>(limit: Duration, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))
}
