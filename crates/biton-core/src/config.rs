//! Configuration system for biton.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BITON_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/biton/config.toml
//!   3. ~/.config/biton/config.toml
//!
//! Environment overrides are named `BITON_<SECTION>__<KEY>`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoError, Keypair};
use crate::infohash::NETWORK_MAIN;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub transport: TransportConfig,
    pub dht: DhtConfig,
    pub swarm: SwarmSettings,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Base58 of public ‖ private. Takes precedence over `keypair_path`.
    pub keypair: Option<String>,
    /// Where a generated keypair is persisted on first run.
    pub keypair_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    /// 0 = OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    /// If false, discovery uses `swarm.static_peers` only.
    pub enabled: bool,
    pub port: u16,
    /// `host:port` bootstrap nodes. Empty = the DHT crate's defaults.
    pub bootstrap: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmSettings {
    pub network: String,
    pub path: String,
    pub seed: String,
    /// `transport://host:port` entries used when the DHT is disabled.
    pub static_peers: Vec<String>,
    pub dial_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Capacity of the discovery → dial hand-off queue.
    pub queue_depth: usize,
    pub max_inflight: usize,
    pub liveness_probe: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Addresses on this host are rewritten to loopback before dialing.
    pub hairpin_host: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keypair: None,
            keypair_path: config_dir().join("keypair"),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 0,
        }
    }
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6881,
            bootstrap: Vec::new(),
        }
    }
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            network: NETWORK_MAIN.into(),
            path: String::new(),
            seed: String::new(),
            static_peers: Vec::new(),
            dial_timeout_ms: 1000,
            handshake_timeout_ms: 5000,
            queue_depth: 16,
            max_inflight: 8,
            liveness_probe: true,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("biton")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid keypair: {0}")]
    Keypair(#[from] CryptoError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path` if it exists, otherwise defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BITON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&NodeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply `BITON_*` overrides fetched through `lookup`.
    ///
    /// Values that fail to parse are ignored and the previous value kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BITON_IDENTITY__KEYPAIR") {
            self.identity.keypair = Some(v);
        }
        if let Some(v) = lookup("BITON_IDENTITY__KEYPAIR_PATH") {
            self.identity.keypair_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("BITON_TRANSPORT__HOST") {
            self.transport.host = v;
        }
        if let Some(p) = lookup("BITON_TRANSPORT__PORT").and_then(|v| v.parse().ok()) {
            self.transport.port = p;
        }
        if let Some(v) = lookup("BITON_DHT__ENABLED") {
            self.dht.enabled = v == "true" || v == "1";
        }
        if let Some(p) = lookup("BITON_DHT__PORT").and_then(|v| v.parse().ok()) {
            self.dht.port = p;
        }
        if let Some(v) = lookup("BITON_SWARM__NETWORK") {
            self.swarm.network = v;
        }
        if let Some(v) = lookup("BITON_SWARM__PATH") {
            self.swarm.path = v;
        }
        if let Some(v) = lookup("BITON_SWARM__SEED") {
            self.swarm.seed = v;
        }
        if let Some(v) = lookup("BITON_SWARM__STATIC_PEERS") {
            self.swarm.static_peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("BITON_DEBUG__HAIRPIN_HOST") {
            self.debug.hairpin_host = (!v.is_empty()).then_some(v);
        }
    }
}

impl IdentityConfig {
    /// Resolve the node keypair: inline value, then `keypair_path`, then a
    /// freshly generated pair written to `keypair_path`.
    ///
    /// Returns the keypair and whether it was generated.
    pub fn load_or_generate(&self) -> Result<(Keypair, bool), ConfigError> {
        if let Some(text) = &self.keypair {
            return Ok((Keypair::from_base58(text)?, false));
        }

        let path = &self.keypair_path;
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            return Ok((Keypair::from_base58(&text)?, false));
        }

        let keypair = Keypair::generate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        write_private(path, keypair.to_base58().as_bytes())
            .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        Ok((keypair, true))
    }
}

/// Create `path` readable by the owner only and write `contents` to it.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
