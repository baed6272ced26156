//! Raw byte-stream transports.
//!
//! The set of transports is closed: each variant of [`Transport`] is one
//! network, selected by the `transport` tag a [`PeerAddress`] carries.
//!
//! [`PeerAddress`]: biton_core::PeerAddress

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::DialError;

/// Any ordered, reliable byte stream a handshake can run over.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A connection whose concrete transport has been erased.
pub type RawConn = Box<dyn RawStream>;

/// TCP over `tokio::net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub const NETWORK: &'static str = "tcp";

    async fn dial(&self, address: &str) -> Result<RawConn, DialError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, address: &str) -> io::Result<Listener> {
        Ok(Listener::Tcp(TcpListener::bind(address).await?))
    }
}

#[derive(Debug, Clone)]
pub enum Transport {
    Tcp(TcpTransport),
}

impl Transport {
    pub fn tcp() -> Self {
        Transport::Tcp(TcpTransport)
    }

    /// Network name, used as the `transport` field of peer addresses.
    pub fn network(&self) -> &'static str {
        match self {
            Transport::Tcp(_) => TcpTransport::NETWORK,
        }
    }

    pub async fn dial(&self, address: &str) -> Result<RawConn, DialError> {
        match self {
            Transport::Tcp(t) => t.dial(address).await,
        }
    }

    pub async fn listen(&self, address: &str) -> io::Result<Listener> {
        match self {
            Transport::Tcp(t) => t.listen(address).await,
        }
    }
}

pub enum Listener {
    Tcp(TcpListener),
}

impl Listener {
    /// Wait for the next inbound connection and the remote's socket address.
    pub async fn accept(&self) -> io::Result<(RawConn, SocketAddr)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, remote) = l.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), remote))
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(l) => l.local_addr(),
        }
    }
}

/// The transports a node runs, keyed by network name.
#[derive(Debug, Clone, Default)]
pub struct TransportSet {
    transports: Vec<Transport>,
}

impl TransportSet {
    pub fn new(transports: impl IntoIterator<Item = Transport>) -> Self {
        let mut set = Self::default();
        for t in transports {
            set.insert(t);
        }
        set
    }

    /// Add a transport, replacing any existing one with the same network name.
    pub fn insert(&mut self, transport: Transport) {
        self.transports.retain(|t| t.network() != transport.network());
        self.transports.push(transport);
    }

    pub fn get(&self, network: &str) -> Option<&Transport> {
        self.transports.iter().find(|t| t.network() == network)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transport> {
        self.transports.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}
