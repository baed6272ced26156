//! biton integration test harness.
//!
//! Every test runs whole swarms on loopback TCP inside one process. Discovery
//! is stubbed with `StaticDiscovery`, so no DHT traffic leaves the machine.
//!
//!   cargo test --test integration
//!
//! Nodes bind port 0, so tests never contend for ports and can run in
//! parallel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;

use biton_core::{Keypair, PeerAddress};
use biton_swarm::{Discovery, StaticDiscovery, Swarm, SwarmConfig, Transport, TransportSet};

mod bootstrap;
mod handshake;
mod hairpin;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Loopback swarm settings with timeouts short enough for tests.
pub fn loopback_config() -> SwarmConfig {
    SwarmConfig {
        listen_host: "127.0.0.1".into(),
        dial_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(500),
        ..SwarmConfig::default()
    }
}

/// A swarm plus the public key other nodes will see.
pub struct Node {
    pub swarm: Swarm,
    pub public: [u8; 32],
}

pub fn node_with(config: SwarmConfig, discovery: Arc<dyn Discovery>) -> Result<Node> {
    let keypair = Keypair::generate()?;
    let public = keypair.public;
    let swarm = Swarm::new(
        config,
        Arc::new(keypair),
        TransportSet::new([Transport::tcp()]),
        discovery,
    );
    Ok(Node { swarm, public })
}

/// A loopback node whose discovery yields `candidates`.
pub fn node(candidates: Vec<PeerAddress>) -> Result<Node> {
    node_with(loopback_config(), Arc::new(StaticDiscovery::new(candidates)))
}

pub fn shutdown_channel() -> broadcast::Sender<()> {
    broadcast::channel(1).0
}

/// Poll until `swarm` has registered `count` peers.
pub async fn wait_for_peers(swarm: &Swarm, count: usize, within: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let have = swarm.list_peers().len();
        if have == count {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("expected {count} peers within {within:?}, have {have}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Two nodes built from identical settings share a discovery key but never
/// an identity.
#[test]
fn test_nodes_share_key_not_identity() {
    let a = node(vec![]).expect("node a");
    let b = node(vec![]).expect("node b");

    assert_eq!(a.swarm.address(), b.swarm.address());
    assert_eq!(a.swarm.discovery_key("tcp"), b.swarm.discovery_key("tcp"));
    assert_ne!(a.swarm.identity(), b.swarm.identity());
}
