//! Peer data model: identity, reachable addresses, and the merged record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Address-independent label for a peer, the base58 of its static public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-way mapping from a static public key to a peer identity.
pub fn identity_from_public_key(public: &[u8]) -> PeerIdentity {
    PeerIdentity(bs58::encode(public).into_string())
}

// ── PeerAddress ───────────────────────────────────────────────────────────────

/// A transport name plus a `host:port` string. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub transport: String,
    pub address: String,
}

impl PeerAddress {
    pub fn new(transport: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            address: address.into(),
        }
    }

    /// Host part of `address`, brackets stripped for IPv6 literals.
    pub fn host(&self) -> Option<&str> {
        let (host, _) = self.address.rsplit_once(':')?;
        Some(host.trim_start_matches('[').trim_end_matches(']'))
    }

    /// Port part of `address`. `None` if missing or not a valid u16.
    pub fn port(&self) -> Option<u16> {
        let (_, port) = self.address.rsplit_once(':')?;
        port.parse().ok()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport, self.address)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected <transport>://<host>:<port>, got {0:?}")]
pub struct ParseAddressError(String);

impl FromStr for PeerAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, address) = s
            .split_once("://")
            .ok_or_else(|| ParseAddressError(s.to_owned()))?;
        if transport.is_empty() || !address.contains(':') {
            return Err(ParseAddressError(s.to_owned()));
        }
        Ok(Self::new(transport, address))
    }
}

// ── PeerInfo ──────────────────────────────────────────────────────────────────

/// Everything known about a peer apart from its live connection.
///
/// `addresses` never holds two structurally equal entries. New addresses are
/// appended, existing ones keep their position, none are ever removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub identity: PeerIdentity,
    #[serde(with = "hex_key")]
    pub public_key: [u8; 32],
    pub addresses: Vec<PeerAddress>,
}

impl PeerInfo {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self {
            identity: identity_from_public_key(&public_key),
            public_key,
            addresses: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: PeerAddress) -> Self {
        self.add_address(address);
        self
    }

    /// Append `address` unless already present. Returns true if it was added.
    pub fn add_address(&mut self, address: PeerAddress) -> bool {
        if self.has_address(&address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    pub fn has_address(&self, address: &PeerAddress) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    /// Fold in the addresses of another record for the same identity.
    pub fn merge(&mut self, other: &PeerInfo) {
        for address in &other.addresses {
            self.add_address(address.clone());
        }
    }
}

mod hex_key {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(&text).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| de::Error::invalid_length(v.len(), &"32 bytes"))
    }
}
