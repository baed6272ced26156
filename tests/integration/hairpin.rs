use std::sync::Arc;

use biton_core::identity_from_public_key;
use biton_swarm::{DialError, Error};

use crate::*;

fn hairpin_config(host: &str) -> SwarmConfig {
    SwarmConfig {
        hairpin_host: Some(host.into()),
        ..loopback_config()
    }
}

/// With the hairpin host set to our own listening host, our own address is
/// refused as a self-dial and never registered.
#[tokio::test]
async fn test_own_address_is_self_dial() {
    let shutdown = shutdown_channel();

    let node = node_with(hairpin_config("127.0.0.1"), Arc::new(StaticDiscovery::default())).unwrap();
    let bound = node.swarm.listen(shutdown.subscribe()).await.unwrap();

    let result = node.swarm.connect(&bound[0]).await;
    assert!(
        matches!(result, Err(Error::Dial(DialError::SelfDial(_)))),
        "{:?}",
        result.err()
    );
    assert!(node.swarm.list_peers().is_empty());

    let _ = shutdown.send(());
}

/// Discovery handing a node its own address leaves the registry empty.
#[tokio::test]
async fn test_bootstrap_skips_own_address() {
    let shutdown = shutdown_channel();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let own = PeerAddress::new("tcp", format!("127.0.0.1:{port}"));

    let node = node_with(
        SwarmConfig {
            listen_port: port,
            ..hairpin_config("127.0.0.1")
        },
        Arc::new(StaticDiscovery::new([own])),
    )
    .unwrap();
    node.swarm.listen(shutdown.subscribe()).await.unwrap();
    node.swarm.bootstrap(shutdown.subscribe()).await.unwrap();

    assert!(node.swarm.list_peers().is_empty());

    let _ = shutdown.send(());
}

/// Another node's address on the hairpin host is dialed over loopback and
/// recorded under the address discovery gave us.
#[tokio::test]
async fn test_hairpin_host_is_rewritten_to_loopback() {
    let shutdown = shutdown_channel();

    let node1 = node(vec![]).unwrap();
    let bound = node1.swarm.listen(shutdown.subscribe()).await.unwrap();
    let port = bound[0].port().unwrap();

    let public_addr = PeerAddress::new("tcp", format!("203.0.113.9:{port}"));
    let node2 = node_with(
        hairpin_config("203.0.113.9"),
        Arc::new(StaticDiscovery::new([public_addr.clone()])),
    )
    .unwrap();
    node2.swarm.listen(shutdown.subscribe()).await.unwrap();
    node2.swarm.bootstrap(shutdown.subscribe()).await.unwrap();

    let peers = node2.swarm.list_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].identity, identity_from_public_key(&node1.public));
    assert_eq!(peers[0].addresses, vec![public_addr]);

    let _ = shutdown.send(());
}

/// Without a hairpin host the node really does reach its own listener, and
/// still ends up with an empty registry on both sides of that connection.
#[tokio::test]
async fn test_own_address_without_hairpin_is_not_registered() {
    let shutdown = shutdown_channel();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let own = PeerAddress::new("tcp", format!("127.0.0.1:{port}"));

    let node = node_with(
        SwarmConfig {
            listen_port: port,
            ..loopback_config()
        },
        Arc::new(StaticDiscovery::new([own])),
    )
    .unwrap();
    node.swarm.listen(shutdown.subscribe()).await.unwrap();
    node.swarm.bootstrap(shutdown.subscribe()).await.unwrap();

    // Give the accept side time to finish its half of the handshake.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let registered: Vec<_> = node.swarm.list_peers().into_iter().map(|p| p.identity).collect();
    assert!(
        !registered.contains(node.swarm.identity()),
        "node registered itself: {registered:?}"
    );
    assert!(registered.is_empty());

    let _ = shutdown.send(());
}
