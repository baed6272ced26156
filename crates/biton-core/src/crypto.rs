//! Cryptographic primitives for biton.
//!
//! Provides two things:
//!   1. The node's long-term X25519 keypair, with base58 text encoding
//!   2. Noise_XX handshake and transport state, driven by snow
//!
//! Keypairs are managed via x25519-dalek for explicit key control.
//! snow drives the Noise_XX state machine using those keys.
//!
//! Private key material is wiped from memory when dropped.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snow::{Builder, HandshakeState, TransportState};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::peer::{identity_from_public_key, PeerIdentity};

/// The Noise protocol pattern biton uses.
///
/// Noise_XX: mutual authentication, both static keys transmitted encrypted.
const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Largest Noise message snow will produce or accept.
pub const MAX_MESSAGE_LEN: usize = 65535;

/// Poly1305 tag appended to every transport message.
pub const TAG_LEN: usize = 16;

/// Largest plaintext that fits in a single transport message.
pub const MAX_PLAINTEXT_LEN: usize = MAX_MESSAGE_LEN - TAG_LEN;

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A node's long-term static X25519 keypair.
///
/// Created once at startup (freshly generated or loaded) and never mutated.
/// The public key is the sole input to the node's peer identity.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    private: Zeroizing<[u8; 32]>,
    pub public: [u8; 32],
}

impl Keypair {
    /// Generate a new random X25519 keypair from the OS randomness source.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(seed.as_mut())
            .map_err(CryptoError::Rng)?;
        Ok(Self::from_private(*seed))
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    /// Peer identity other nodes will derive for us after a handshake.
    pub fn identity(&self) -> PeerIdentity {
        identity_from_public_key(&self.public)
    }

    /// Encode as base58 of `public || private`.
    pub fn to_base58(&self) -> String {
        let mut raw = Zeroizing::new([0u8; 64]);
        raw[..32].copy_from_slice(&self.public);
        raw[32..].copy_from_slice(self.private.as_ref());
        bs58::encode(&raw[..]).into_string()
    }

    /// Decode the `public || private` base58 form produced by [`Keypair::to_base58`].
    pub fn from_base58(text: &str) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(bs58::decode(text.trim()).into_vec()?);
        if raw.len() != 64 {
            return Err(CryptoError::KeyLength(raw.len()));
        }

        let mut private = [0u8; 32];
        private.copy_from_slice(&raw[32..]);
        let keypair = Self::from_private(private);
        private.zeroize();

        if keypair.public[..] != raw[..32] {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(keypair)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

impl Serialize for Keypair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Keypair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        Keypair::from_base58(&text).map_err(serde::de::Error::custom)
    }
}

// ── Noise Handshake ───────────────────────────────────────────────────────────

/// Which side of the handshake this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// What a finished handshake tells us about the remote end.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// The remote's static X25519 public key.
    pub remote_static: [u8; 32],
    /// Noise handshake hash, identical on both sides.
    pub handshake_hash: Vec<u8>,
}

/// Noise_XX handshake in progress.
///
/// XX is three messages: the initiator writes 1 and 3, the responder writes 2.
/// Callers alternate `write_message` / `read_message` according to their role
/// until [`NoiseHandshake::is_finished`] reports true.
pub struct NoiseHandshake {
    state: HandshakeState,
}

impl NoiseHandshake {
    pub fn new(keypair: &Keypair, role: Role) -> Result<Self, CryptoError> {
        let builder = Builder::new(NOISE_PATTERN.parse().map_err(|_| CryptoError::BadPattern)?)
            .local_private_key(keypair.private.as_ref());
        let state = match role {
            Role::Initiator => builder.build_initiator()?,
            Role::Responder => builder.build_responder()?,
        };
        Ok(Self { state })
    }

    /// True when it is our turn to write the next handshake message.
    pub fn is_my_turn(&self) -> bool {
        self.state.is_my_turn()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Produce the next handshake message carrying an empty payload.
    pub fn write_message(&mut self) -> Result<Vec<u8>, CryptoError> {
        let mut msg = vec![0u8; MAX_MESSAGE_LEN];
        let len = self.state.write_message(&[], &mut msg)?;
        msg.truncate(len);
        Ok(msg)
    }

    /// Consume the remote's next handshake message. Any payload is discarded.
    pub fn read_message(&mut self, msg: &[u8]) -> Result<(), CryptoError> {
        let mut payload = vec![0u8; msg.len()];
        self.state.read_message(msg, &mut payload)?;
        Ok(())
    }

    /// Switch to transport mode, returning the session and what we learned
    /// about the remote.
    pub fn finish(self) -> Result<(Session, HandshakeOutcome), CryptoError> {
        if !self.state.is_handshake_finished() {
            return Err(CryptoError::Incomplete);
        }
        let remote = self
            .state
            .get_remote_static()
            .ok_or(CryptoError::MissingRemoteStatic)?;
        let remote_static: [u8; 32] = remote
            .try_into()
            .map_err(|_| CryptoError::KeyLength(remote.len()))?;
        let handshake_hash = self.state.get_handshake_hash().to_vec();

        let transport = self.state.into_transport_mode()?;
        Ok((
            Session { transport },
            HandshakeOutcome {
                remote_static,
                handshake_hash,
            },
        ))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A completed Noise_XX session over an ordered byte stream.
///
/// Uses the stateful TransportState: nonces are implicit and advance with
/// every message, so messages must be decrypted in the order they were sent.
pub struct Session {
    transport: TransportState,
}

impl Session {
    /// Encrypt one message. `plaintext` must not exceed [`MAX_PLAINTEXT_LEN`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CryptoError::TooLong(plaintext.len()));
        }
        let mut out = vec![0u8; plaintext.len() + TAG_LEN];
        let len = self.transport.write_message(plaintext, &mut out)?;
        out.truncate(len);
        Ok(out)
    }

    /// Decrypt one message and verify its MAC.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::TooShort);
        }
        let mut out = vec![0u8; ciphertext.len()];
        let len = self.transport.read_message(ciphertext, &mut out)?;
        out.truncate(len);
        Ok(out)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("randomness source failed: {0}")]
    Rng(rand::Error),

    #[error("invalid Noise pattern string")]
    BadPattern,

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("handshake not finished")]
    Incomplete,

    #[error("remote static key missing after handshake")]
    MissingRemoteStatic,

    #[error("invalid base58: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("unexpected key material length {0}")]
    KeyLength(usize),

    #[error("public key does not match private key")]
    KeyMismatch,

    #[error("ciphertext shorter than the {TAG_LEN}-byte MAC")]
    TooShort,

    #[error("plaintext of {0} bytes exceeds a single Noise message")]
    TooLong(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
