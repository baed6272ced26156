use std::time::Duration;

use biton_core::identity_from_public_key;
use biton_swarm::{Error, HandshakeError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::*;

/// A peer that hangs up mid-handshake leaves the registry alone and does not
/// stop the next inbound connection from registering.
#[tokio::test]
async fn test_abandoned_handshake_does_not_block_accept() {
    let shutdown = shutdown_channel();

    let node1 = node(vec![]).unwrap();
    let bound = node1.swarm.listen(shutdown.subscribe()).await.unwrap();

    let mut quitter = TcpStream::connect(&bound[0].address).await.unwrap();
    // A length prefix promising 32 bytes, then only 4 of them.
    quitter.write_all(&[0x00, 0x20, 0xde, 0xad, 0xbe, 0xef]).await.unwrap();
    drop(quitter);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(node1.swarm.list_peers().is_empty());

    let node2 = node(bound.clone()).unwrap();
    node2.swarm.bootstrap(shutdown.subscribe()).await.unwrap();

    wait_for_peers(&node1.swarm, 1, Duration::from_secs(2)).await.unwrap();
    let peers = node1.swarm.list_peers();
    assert_eq!(peers[0].identity, identity_from_public_key(&node2.public));

    let _ = shutdown.send(());
}

/// A peer that connects and never speaks is cut off by the handshake timeout
/// while other peers keep registering.
#[tokio::test]
async fn test_silent_inbound_does_not_block_accept() {
    let shutdown = shutdown_channel();

    let node1 = node(vec![]).unwrap();
    let bound = node1.swarm.listen(shutdown.subscribe()).await.unwrap();

    let _silent = TcpStream::connect(&bound[0].address).await.unwrap();

    let node2 = node(bound.clone()).unwrap();
    node2.swarm.bootstrap(shutdown.subscribe()).await.unwrap();
    assert_eq!(node2.swarm.list_peers().len(), 1);
    wait_for_peers(&node1.swarm, 1, Duration::from_secs(2)).await.unwrap();

    let _ = shutdown.send(());
}

/// A listener that accepts but never answers yields a timeout, not a peer.
#[tokio::test]
async fn test_unresponsive_listener_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = biton_core::PeerAddress::new("tcp", listener.local_addr().unwrap().to_string());
    let _hold = tokio::spawn(async move {
        let accepted = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(accepted);
    });

    let dialer = node(vec![]).unwrap();
    let result = dialer.swarm.connect(&target).await;
    assert!(matches!(result, Err(Error::Timeout(_))), "{:?}", result.err());
    assert!(dialer.swarm.list_peers().is_empty());
}

/// Something that answers with garbage is a handshake failure.
#[tokio::test]
async fn test_garbage_responder_is_handshake_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = biton_core::PeerAddress::new("tcp", listener.local_addr().unwrap().to_string());
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(&[0x00, 0x03, 1, 2, 3]).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let dialer = node(vec![]).unwrap();
    let result = dialer.swarm.connect(&target).await;
    assert!(
        matches!(result, Err(Error::Handshake(HandshakeError::Noise(_)))),
        "{:?}",
        result.err()
    );
    assert!(dialer.swarm.list_peers().is_empty());
}

/// Once shutdown fires the listener stops taking connections, so a later
/// dial fails and the registry is left as it was.
#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let shutdown = shutdown_channel();

    let node1 = node(vec![]).unwrap();
    let bound = node1.swarm.listen(shutdown.subscribe()).await.unwrap();
    let _ = shutdown.send(());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let node2 = node(vec![]).unwrap();
    let result = node2.swarm.connect(&bound[0]).await;
    assert!(result.is_err(), "connected to a listener after shutdown");
    assert!(node2.swarm.list_peers().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(node1.swarm.list_peers().is_empty());
}
