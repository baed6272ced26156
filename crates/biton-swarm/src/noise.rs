//! Noise_XX over an ordered byte stream.
//!
//! Every Noise message, handshake or transport, travels as a frame:
//!
//!   [len: u16 big-endian][message: len bytes]
//!
//! The handshake completes before [`NoiseStream`] is handed out, so the
//! remote's static key is always known before any application data is read.

use std::io;

use biton_core::crypto::{Keypair, NoiseHandshake, Role, Session};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;

/// Payload of [`ConnectionState::channel_binding`], JSON encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBinding {
    pub peer_public: Vec<u8>,
    pub handshake_hash: Vec<u8>,
}

/// What the handshake left behind on a connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub role: Role,
    /// JSON-encoded [`ChannelBinding`].
    pub channel_binding: Option<Vec<u8>>,
}

/// An authenticated, encrypted connection.
pub struct NoiseStream<S> {
    inner: S,
    session: Session,
    state: ConnectionState,
}

impl<S> NoiseStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake as the dialing side.
    pub async fn initiate(inner: S, keypair: &Keypair) -> Result<Self, HandshakeError> {
        Self::handshake(inner, keypair, Role::Initiator).await
    }

    /// Run the handshake as the accepting side.
    pub async fn respond(inner: S, keypair: &Keypair) -> Result<Self, HandshakeError> {
        Self::handshake(inner, keypair, Role::Responder).await
    }

    async fn handshake(mut inner: S, keypair: &Keypair, role: Role) -> Result<Self, HandshakeError> {
        let mut hs = NoiseHandshake::new(keypair, role)?;
        while !hs.is_finished() {
            if hs.is_my_turn() {
                let msg = hs.write_message()?;
                write_frame(&mut inner, &msg).await?;
            } else {
                let msg = read_frame(&mut inner).await?;
                hs.read_message(&msg)?;
            }
        }

        let (session, outcome) = hs.finish()?;
        let binding = ChannelBinding {
            peer_public: outcome.remote_static.to_vec(),
            handshake_hash: outcome.handshake_hash,
        };
        let channel_binding =
            serde_json::to_vec(&binding).map_err(HandshakeError::MalformedState)?;

        Ok(Self {
            inner,
            session,
            state: ConnectionState {
                role,
                channel_binding: Some(channel_binding),
            },
        })
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.state
    }

    /// Encrypt and send one message.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), HandshakeError> {
        let ct = self.session.encrypt(plaintext)?;
        write_frame(&mut self.inner, &ct).await?;
        Ok(())
    }

    /// Receive and decrypt one message.
    pub async fn recv(&mut self) -> Result<Vec<u8>, HandshakeError> {
        let ct = read_frame(&mut self.inner).await?;
        Ok(self.session.decrypt(&ct)?)
    }

    /// Close the write half. The remote sees end-of-stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

async fn write_frame<S: AsyncWrite + Unpin>(io: &mut S, msg: &[u8]) -> io::Result<()> {
    let len = u16::try_from(msg.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "noise frame too large"))?;
    let mut frame = Vec::with_capacity(2 + msg.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(msg);
    io.write_all(&frame).await?;
    io.flush().await
}

async fn read_frame<S: AsyncRead + Unpin>(io: &mut S) -> Result<Vec<u8>, HandshakeError> {
    let mut len = [0u8; 2];
    read_exact_or_closed(io, &mut len).await?;
    let mut msg = vec![0u8; u16::from_be_bytes(len) as usize];
    read_exact_or_closed(io, &mut msg).await?;
    Ok(msg)
}

async fn read_exact_or_closed<S: AsyncRead + Unpin>(
    io: &mut S,
    buf: &mut [u8],
) -> Result<(), HandshakeError> {
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(HandshakeError::Closed),
        Err(e) => Err(e.into()),
    }
}
