//! End-to-end scenarios exercised over real loopback UDP sockets, since KCP
//! needs a real socket pair rather than a `tokio::io::duplex`.

use std::net::SocketAddr;
use std::time::Duration;

use onynet::client::{Client, HandshakeTiming};
use onynet::server::Server;
use onynet::transport::TransportConfig;
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio_util::sync::CancellationToken;

const ANY_LOCAL: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 0);
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    (private_key, public_key)
}

#[tokio::test]
async fn anonymous_echo() {
    let cancel = CancellationToken::new();
    let mut server = Server::bind(ANY_LOCAL, None, TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        let mut conn = conn.write().await;
        let mut stream = conn.accept_stream("echo", OPEN_TIMEOUT).await.unwrap();
        let mut buf = [0u8; 5];
        stream.receive(&mut buf, OPEN_TIMEOUT).await.unwrap();
        stream.send(&buf, OPEN_TIMEOUT).await.unwrap();
    });

    let mut client = Client::dial(server_addr, None, TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let mut stream = client.open_stream("echo", OPEN_TIMEOUT).await.unwrap();
    stream.send(b"hello", OPEN_TIMEOUT).await.unwrap();
    let mut reply = [0u8; 5];
    stream.receive(&mut reply, OPEN_TIMEOUT).await.unwrap();

    server_task.await.unwrap();
    assert_eq!(&reply, b"hello");
}

#[tokio::test]
async fn authenticated_key_exchange_and_encrypted_transfer() {
    let (private_key, public_key) = test_keypair();
    let cancel = CancellationToken::new();

    let mut server = Server::bind(ANY_LOCAL, Some(private_key), TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        let mut conn = conn.write().await;
        let mut stream = conn.accept_stream("secrets", OPEN_TIMEOUT).await.unwrap();
        let received = stream.receive_encrypted(1024, OPEN_TIMEOUT).await.unwrap();
        stream.send_encrypted(&received, OPEN_TIMEOUT).await.unwrap();
    });

    let mut client = Client::dial(server_addr, Some(&public_key), TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let mut stream = client.open_stream("secrets", OPEN_TIMEOUT).await.unwrap();
    stream.send_encrypted(b"confidential payload", OPEN_TIMEOUT).await.unwrap();
    let echoed = stream.receive_encrypted(1024, OPEN_TIMEOUT).await.unwrap();

    server_task.await.unwrap();
    assert_eq!(echoed, b"confidential payload");
}

#[tokio::test]
async fn wrong_public_key_fails_handshake() {
    let (private_key, _matching_public_key) = test_keypair();
    let (_other_private_key, wrong_public_key) = test_keypair();
    let cancel = CancellationToken::new();

    let mut server = Server::bind(ANY_LOCAL, Some(private_key), TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let _ = server.accept().await;
    });

    let result = Client::dial(server_addr, Some(&wrong_public_key), TransportConfig::default(), &cancel).await;
    assert!(result.is_err());

    let _ = server_task.await;
}

#[tokio::test]
async fn name_mismatch_streams_are_recycled() {
    let cancel = CancellationToken::new();
    let mut server = Server::bind(ANY_LOCAL, None, TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    // The server's single accept loop spends its early attempts rejecting
    // streams named "decoy" before the matching "wanted" stream arrives; a
    // mismatch must not stall or break the eventual rendezvous.
    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        let mut conn = conn.write().await;
        let mut stream = conn.accept_stream("wanted", OPEN_TIMEOUT).await.unwrap();
        let mut buf = [0u8; 6];
        stream.receive(&mut buf, OPEN_TIMEOUT).await.unwrap();
        assert_eq!(&buf, b"landed");
    });

    let mut client = Client::dial(server_addr, None, TransportConfig::default(), &cancel)
        .await
        .unwrap();

    // Every attempt to open "decoy" gets rejected by the server's "wanted"
    // acceptor, so this call exhausts its budget and times out rather than
    // ever rendezvousing.
    let decoy_result = client.open_stream("decoy", Duration::from_millis(300)).await;
    assert!(decoy_result.is_err());

    let mut wanted = client.open_stream("wanted", OPEN_TIMEOUT).await.unwrap();
    wanted.send(b"landed", OPEN_TIMEOUT).await.unwrap();

    server_task.await.unwrap();
}

#[tokio::test]
async fn heartbeat_failure_tears_down_the_client() {
    let cancel = CancellationToken::new();
    let mut server = Server::bind(ANY_LOCAL, None, TransportConfig::default(), &cancel)
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let fast_timing = HandshakeTiming {
        handshake_deadline: Duration::from_secs(5),
        stream_poll_interval: Duration::from_millis(20),
        heartbeat_tick: Duration::from_millis(100),
        heartbeat_deadline: Duration::from_millis(150),
    };

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        // Drop the accepted connection immediately instead of running its
        // heartbeat responder, so the client's next heartbeat round trip
        // times out.
        conn.write().await.close().await.unwrap();
    });

    let mut client = Client::dial_with_timing(server_addr, None, TransportConfig::default(), fast_timing, &cancel)
        .await
        .unwrap();
    server_task.await.unwrap();

    // Give the background heartbeat sender time to notice the missed pong
    // and cancel the client's token.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let err = client.open_stream("anything", Duration::from_millis(500)).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn cancelling_during_handshake_tears_down_without_hanging() {
    let server_cancel = CancellationToken::new();
    let server = Server::bind(ANY_LOCAL, None, TransportConfig::default(), &server_cancel)
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    // The server never accepts, so the client's heartbeat-stream open_stream
    // call sits in its poll/retry loop indefinitely unless cancelled.

    let client_cancel = CancellationToken::new();
    let dial_cancel = client_cancel.clone();
    let dial_task = tokio::spawn(async move {
        Client::dial(server_addr, None, TransportConfig::default(), &dial_cancel).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    client_cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), dial_task)
        .await
        .expect("cancelling should unblock the pending handshake promptly, not hang")
        .expect("dial task should not panic");

    assert!(result.is_err(), "a cancelled dial must fail rather than succeed");
}
