//! biton-core: key material, peer model, discovery keys, and configuration.
//! All other biton crates depend on this one.

pub mod config;
pub mod crypto;
pub mod infohash;
pub mod peer;

pub use crypto::{CryptoError, Keypair};
pub use infohash::DiscoveryKey;
pub use peer::{identity_from_public_key, PeerAddress, PeerIdentity, PeerInfo};
