use std::io;
use std::time::Duration;

use biton_core::crypto::CryptoError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything the swarm can fail with.
///
/// Setup failures (`Crypto`, `Discovery`, `Listen`) propagate to the caller of
/// `listen`/`bootstrap`. The rest are per-connection and only ever logged by
/// the swarm's own loops.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("discovery failed: {0}")]
    Discovery(#[source] io::Error),

    #[error("dial failed: {0}")]
    Dial(#[from] DialError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DialError {
    #[error("no transport registered for {0:?}")]
    UnknownTransport(String),

    #[error("refusing to dial own address {0}")]
    SelfDial(String),

    #[error("malformed address {0:?}")]
    InvalidAddress(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Noise(#[from] CryptoError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("connection closed by remote")]
    Closed,

    #[error("connection state carries no channel binding")]
    MissingState,

    #[error("malformed channel binding: {0}")]
    MalformedState(#[source] serde_json::Error),

    #[error("remote public key has length {0}, expected 32")]
    BadPublicKey(usize),

    #[error("remote presented our own identity")]
    SelfConnection,

    #[error("liveness probe failed: {0}")]
    Probe(String),
}
