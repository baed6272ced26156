//! Discovery keys and the swarm address they are derived from.
//!
//! A swarm is named by four fields joined with `:`:
//!
//!   `<version>:<network>:<path>:<seed>`
//!
//! The discovery key is the BLAKE2b-256 digest of that string truncated to
//! 20 bytes, the size of a Mainline DHT info hash.

use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Protocol version carried in every swarm address.
pub const PROTOCOL_VERSION: &str = "biton0";

/// Network tag of the main network.
pub const NETWORK_MAIN: &str = "";

/// Network tag of the test network.
pub const NETWORK_TEST: &str = "test";

/// Length of a discovery key in bytes.
pub const DISCOVERY_KEY_LEN: usize = 20;

/// Build `"<version>:<network>:<path>:<seed>"`. Empty fields stay empty.
pub fn swarm_address(version: &str, network: &str, path: &str, seed: &str) -> String {
    format!("{version}:{network}:{path}:{seed}")
}

/// Fixed-length lookup key in the discovery network.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryKey([u8; DISCOVERY_KEY_LEN]);

impl DiscoveryKey {
    /// Hash `input` and keep the leading 20 bytes.
    pub fn derive(input: &str) -> Self {
        let digest = Blake2b256::digest(input.as_bytes());
        let mut key = [0u8; DISCOVERY_KEY_LEN];
        key.copy_from_slice(&digest[..DISCOVERY_KEY_LEN]);
        Self(key)
    }

    /// Key a transport looks the swarm up under: `derive("<transport>/<address>")`.
    pub fn for_transport(transport: &str, swarm_address: &str) -> Self {
        Self::derive(&format!("{transport}/{swarm_address}"))
    }

    pub fn from_bytes(bytes: [u8; DISCOVERY_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DISCOVERY_KEY_LEN] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryKey({self})")
    }
}
