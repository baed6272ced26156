//! bitond: the biton swarm daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use biton_core::config::NodeConfig;
use biton_core::PeerAddress;
use biton_swarm::{
    mainline_node_id, Discovery, MainlineDiscovery, StaticDiscovery, Swarm, SwarmConfig,
    Transport, TransportSet,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = NodeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = NodeConfig::load().context("failed to load config")?;

    // Keypair
    let (keypair, generated) = config
        .identity
        .load_or_generate()
        .context("failed to load keypair")?;
    if generated {
        tracing::info!(path = %config.identity.keypair_path.display(), "generated new keypair");
    }
    let keypair = Arc::new(keypair);
    tracing::info!(
        identity = %keypair.identity(),
        public_key = hex::encode(keypair.public),
        mainline_node_id = hex::encode(mainline_node_id(&keypair.public)),
        "keypair ready"
    );

    // Discovery
    let discovery: Arc<dyn Discovery> = if config.dht.enabled {
        let dht = MainlineDiscovery::bind(config.dht.port, &config.dht.bootstrap)
            .context("failed to start mainline DHT")?;
        tracing::info!(port = config.dht.port, "mainline DHT started");
        Arc::new(dht)
    } else {
        Arc::new(StaticDiscovery::new(static_peers(&config.swarm.static_peers)))
    };

    let swarm = Swarm::new(
        SwarmConfig::from_node_config(&config),
        keypair,
        TransportSet::new([Transport::tcp()]),
        discovery,
    );
    tracing::info!(
        swarm = %swarm.address(),
        info_hash = %swarm.discovery_key("tcp"),
        "node info"
    );
    if let Some(host) = &config.debug.hairpin_host {
        tracing::warn!(%host, "hairpin override enabled");
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Listen, then bootstrap ───────────────────────────────────────────────

    let bound = swarm
        .listen(shutdown_tx.subscribe())
        .await
        .context("failed to listen")?;
    for address in &bound {
        tracing::info!(%address, "accepting peers");
    }

    swarm
        .bootstrap(shutdown_tx.subscribe())
        .await
        .context("failed to bootstrap")?;

    let peers = swarm.list_peers();
    tracing::info!(count = peers.len(), "found peers");
    for peer in &peers {
        let addresses: Vec<String> = peer.addresses.iter().map(ToString::to_string).collect();
        tracing::info!(peer = %peer.identity, addresses = ?addresses, "peer");
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let _ = shutdown_rx.recv().await;
    tracing::info!(peers = swarm.list_peers().len(), "shutting down");

    Ok(())
}

/// Parse `transport://host:port` entries, skipping malformed ones.
fn static_peers(entries: &[String]) -> Vec<PeerAddress> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<PeerAddress>() {
            Ok(address) => Some(address),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring static peer");
                None
            }
        })
        .collect()
}
