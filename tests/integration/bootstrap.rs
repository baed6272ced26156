use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use biton_core::{identity_from_public_key, DiscoveryKey, PeerAddress};
use biton_swarm::{AddressStream, Discovery, Result as SwarmResult};
use tokio::net::TcpListener;

use crate::*;

/// Node 2 discovers node 1 once and ends up with exactly one peer: node 1,
/// reachable at the address it listens on.
#[tokio::test]
async fn test_bootstrap_registers_discovered_node() {
    let shutdown = shutdown_channel();

    let node1 = node(vec![]).unwrap();
    let bound = node1.swarm.listen(shutdown.subscribe()).await.unwrap();
    assert_eq!(bound.len(), 1);
    let listen_addr = bound[0].clone();

    let node2 = node(vec![listen_addr.clone()]).unwrap();
    node2.swarm.bootstrap(shutdown.subscribe()).await.unwrap();

    let peers = node2.swarm.list_peers();
    assert_eq!(peers.len(), 1, "exactly one peer expected: {peers:?}");
    assert_eq!(peers[0].identity, identity_from_public_key(&node1.public));
    assert!(peers[0].addresses.contains(&listen_addr));

    // Node 1 registers node 2 too, with no address.
    wait_for_peers(&node1.swarm, 1, Duration::from_secs(2)).await.unwrap();
    let inbound = node1.swarm.list_peers();
    assert_eq!(inbound[0].identity, identity_from_public_key(&node2.public));
    assert!(inbound[0].addresses.is_empty());

    let _ = shutdown.send(());
}

/// A candidate repeated twice plus a sentinel-port entry produce one dial.
#[tokio::test]
async fn test_duplicate_candidates_dial_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = PeerAddress::new("tcp", listener.local_addr().unwrap().to_string());

    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    let shutdown = shutdown_channel();
    let dialer = node(vec![
        target.clone(),
        target.clone(),
        PeerAddress::new("tcp", "127.0.0.1:1"),
    ])
    .unwrap();
    dialer.swarm.bootstrap(shutdown.subscribe()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(dialer.swarm.list_peers().is_empty());
}

/// Addresses already held by a registered peer are not dialed again.
#[tokio::test]
async fn test_second_bootstrap_skips_known_addresses() {
    let shutdown = shutdown_channel();

    let node1 = node(vec![]).unwrap();
    let bound = node1.swarm.listen(shutdown.subscribe()).await.unwrap();

    let node2 = node(bound.clone()).unwrap();
    node2.swarm.bootstrap(shutdown.subscribe()).await.unwrap();
    wait_for_peers(&node1.swarm, 1, Duration::from_secs(2)).await.unwrap();

    let before = node2.swarm.registry().get(&identity_from_public_key(&node1.public)).unwrap();
    node2.swarm.bootstrap(shutdown.subscribe()).await.unwrap();
    let after = node2.swarm.registry().get(&identity_from_public_key(&node1.public)).unwrap();

    assert!(Arc::ptr_eq(&before.connection, &after.connection));
    assert_eq!(node2.swarm.list_peers().len(), 1);

    let _ = shutdown.send(());
}

/// Nodes that dial each other at the same time still hold one entry each.
#[tokio::test]
async fn test_mutual_dial_keeps_one_entry_per_identity() {
    let shutdown = shutdown_channel();

    // Bind both first so each can be given the other's address.
    let seed1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port1 = seed1.local_addr().unwrap().port();
    let port2 = seed2.local_addr().unwrap().port();
    drop((seed1, seed2));

    let addr1 = PeerAddress::new("tcp", format!("127.0.0.1:{port1}"));
    let addr2 = PeerAddress::new("tcp", format!("127.0.0.1:{port2}"));

    let node1 = node_with(
        SwarmConfig {
            listen_port: port1,
            ..loopback_config()
        },
        Arc::new(StaticDiscovery::new([addr2.clone()])),
    )
    .unwrap();
    let node2 = node_with(
        SwarmConfig {
            listen_port: port2,
            ..loopback_config()
        },
        Arc::new(StaticDiscovery::new([addr1.clone()])),
    )
    .unwrap();

    node1.swarm.listen(shutdown.subscribe()).await.unwrap();
    node2.swarm.listen(shutdown.subscribe()).await.unwrap();

    let (r1, r2) = tokio::join!(
        node1.swarm.bootstrap(shutdown.subscribe()),
        node2.swarm.bootstrap(shutdown.subscribe())
    );
    r1.unwrap();
    r2.unwrap();

    wait_for_peers(&node1.swarm, 1, Duration::from_secs(2)).await.unwrap();
    wait_for_peers(&node2.swarm, 1, Duration::from_secs(2)).await.unwrap();

    let seen_by_1 = node1.swarm.list_peers();
    assert_eq!(seen_by_1[0].identity, identity_from_public_key(&node2.public));
    assert_eq!(seen_by_1[0].addresses, vec![addr2]);

    let seen_by_2 = node2.swarm.list_peers();
    assert_eq!(seen_by_2[0].identity, identity_from_public_key(&node1.public));
    assert_eq!(seen_by_2[0].addresses, vec![addr1]);

    let _ = shutdown.send(());
}

/// A discovery source that never finishes on its own.
struct Endless;

impl Discovery for Endless {
    fn get_peers(
        &self,
        _shutdown: broadcast::Receiver<()>,
        _transport: &str,
        _key: &DiscoveryKey,
        _listen_port: u16,
    ) -> SwarmResult<AddressStream> {
        Ok(Box::pin(futures::stream::pending::<PeerAddress>()))
    }
}

#[tokio::test]
async fn test_shutdown_ends_bootstrap() {
    let shutdown = shutdown_channel();
    let node = node_with(loopback_config(), Arc::new(Endless)).unwrap();
    let node = Arc::new(node);

    let running = {
        let node = Arc::clone(&node);
        let rx = shutdown.subscribe();
        tokio::spawn(async move { node.swarm.bootstrap(rx).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.is_finished());

    shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("bootstrap should stop after shutdown")
        .unwrap()
        .unwrap();
}
