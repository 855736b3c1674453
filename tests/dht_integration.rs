//! End-to-end scenarios against real loopback UDP sockets (spec.md §8).

use blob_dht::config::{Config, K, MSG_SIZE_LIMIT};
use blob_dht::contact::PeerContact;
use blob_dht::id::NodeId;
use blob_dht::node::Node;
use blob_dht::peer_manager::Liveness;
use blob_dht::rpc::RpcLayer;
use blob_dht::wire::messages::{Frame, MethodCall, MethodResult};
use std::net::Ipv4Addr;
use std::time::Duration;

fn loopback_config() -> Config {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut config = Config::default();
    config.listen_addr = "127.0.0.1:0".parse().unwrap();
    config
}

fn contact_for(addr: std::net::SocketAddr, id: NodeId) -> PeerContact {
    PeerContact::from_socket_addr(addr, 1).unwrap().with_node_id(id)
}

#[tokio::test]
async fn ping_round_trip() {
    let mut id_a_bytes = [0u8; 48];
    id_a_bytes[47] = 1;
    let mut id_b_bytes = [0u8; 48];
    id_b_bytes[47] = 2;
    let id_a = NodeId::from_bytes(id_a_bytes);
    let id_b = NodeId::from_bytes(id_b_bytes);

    let node_a = Node::start(loopback_config(), id_a).await.unwrap();
    let node_b = Node::start(loopback_config(), id_b).await.unwrap();
    let addr_b = node_b.rpc.local_addr().unwrap();
    let contact_b = contact_for(addr_b, id_b);

    let result = node_a.rpc.send_request(contact_b, MethodCall::Ping).await.unwrap();
    assert_eq!(result, MethodResult::Pong);

    let pm = node_a.rpc.peer_manager.lock().await;
    assert!(matches!(pm.peer_is_good(contact_b.address_key()), Liveness::Good));
    drop(pm);

    let in_table = node_a.rpc.routing.lock().await.get_peer(&id_b).is_some();
    assert!(in_table);
}

#[tokio::test]
async fn store_then_find_value_round_trip() {
    let mut id_a_bytes = [0u8; 48];
    id_a_bytes[47] = 1;
    let mut id_b_bytes = [0u8; 48];
    id_b_bytes[47] = 2;
    let id_a = NodeId::from_bytes(id_a_bytes);
    let id_b = NodeId::from_bytes(id_b_bytes);

    let node_a = Node::start(loopback_config(), id_a).await.unwrap();
    let node_b = Node::start(loopback_config(), id_b).await.unwrap();
    let addr_b = node_b.rpc.local_addr().unwrap();
    let contact_b = contact_for(addr_b, id_b);

    let blob = NodeId::generate();

    let first = node_a
        .rpc
        .send_request(contact_b, MethodCall::FindValue { blob_id: blob, page: 0 })
        .await
        .unwrap();
    let MethodResult::Value { token, blob_peers, .. } = first else {
        panic!("expected a Value result");
    };
    assert!(blob_peers.unwrap().is_empty());

    let store_result = node_a
        .rpc
        .send_request(
            contact_b,
            MethodCall::Store(blob_dht::wire::messages::StoreArgs { blob_hash: blob, token, tcp_port: 4242 }),
        )
        .await
        .unwrap();
    assert_eq!(store_result, MethodResult::Ok);

    let second = node_a
        .rpc
        .send_request(contact_b, MethodCall::FindValue { blob_id: blob, page: 0 })
        .await
        .unwrap();
    let MethodResult::Value { blob_peers, .. } = second else {
        panic!("expected a Value result");
    };
    let peers = blob_peers.unwrap();
    assert_eq!(peers.len(), 1);
    // record layout: 4 bytes ipv4, 2 bytes port, 48 bytes node id
    let record = peers[0];
    assert_eq!(&record[..4], &Ipv4Addr::LOCALHOST.octets());
    assert_eq!(u16::from_be_bytes([record[4], record[5]]), 4242);
}

#[tokio::test]
async fn bucket_split_on_insertion_past_capacity() {
    let local = NodeId::from_bytes([0u8; 48]);
    let rpc = RpcLayer::bind(loopback_config(), local).await.unwrap();

    for i in 0..(K + 1) {
        let mut bytes = [0u8; 48];
        bytes[47] = (i + 1) as u8;
        let peer = PeerContact::new(
            Some(NodeId::from_bytes(bytes)),
            Ipv4Addr::LOCALHOST,
            1000 + i as u16,
            None,
            1,
        )
        .unwrap();
        let is_stale = |_: &PeerContact| false;
        let probe = |_: PeerContact| async { false };
        blob_dht::routing::add_peer(&rpc.routing, peer, is_stale, probe).await;
    }

    let table = rpc.routing.lock().await;
    let mut bytes = [0u8; 48];
    bytes[47] = 1;
    assert!(table.get_peer(&NodeId::from_bytes(bytes)).is_some());
}

#[tokio::test]
async fn oversized_datagram_is_rejected_before_send() {
    let local = NodeId::from_bytes([0u8; 48]);
    let mut huge_blob = [0u8; 48];
    huge_blob[0] = 0xFF;
    // Construct a frame whose bencoded form exceeds MSG_SIZE_LIMIT by
    // padding the exception message of an error frame.
    let frame = Frame::Error {
        rpc_id: [1u8; 20],
        node_id: local,
        exception_type: "X".repeat(10),
        message: "Y".repeat(MSG_SIZE_LIMIT + 100),
    };
    let err = blob_dht::wire::encode(&frame).unwrap_err();
    assert!(matches!(err, blob_dht::error::CodecError::Oversized(_, _)));
}

#[tokio::test]
async fn token_rejected_outside_startup_grace_window() {
    // The startup grace window is the same duration as the token secret
    // refresh interval (spec.md §4.6/§7), so pin it small enough to sleep
    // past in a test.
    let mut config = loopback_config();
    config.token_secret_refresh_interval = Duration::from_millis(1);
    let local = NodeId::from_bytes([0u8; 48]);
    let rpc = RpcLayer::bind(config, local).await.unwrap();

    assert!(rpc.in_startup_grace());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!rpc.in_startup_grace());

    let sender = PeerContact::new(Some(NodeId::generate()), Ipv4Addr::LOCALHOST, 6881, None, 1).unwrap();
    let secrets = rpc.token_secrets.lock().await;
    let mut blob_store = rpc.blob_store.lock().await;
    let args = blob_dht::wire::messages::StoreArgs {
        blob_hash: NodeId::generate(),
        token: [0xAAu8; blob_dht::config::TOKEN_LEN],
        tcp_port: 1234,
    };
    let result = blob_dht::rpc::handlers::handle_store(
        &args,
        sender,
        Ipv4Addr::LOCALHOST,
        &secrets,
        true,
        rpc.in_startup_grace(),
        &mut blob_store,
    );
    assert!(result.is_err());
}
