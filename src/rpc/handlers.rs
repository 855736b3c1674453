//! Pure method handlers invoked by the RPC dispatcher (spec.md §4.6).
//!
//! Handlers never suspend: they take already-locked state and return a
//! result synchronously, so the caller can send the response datagram
//! without risking a reordering race against the pending-request table
//! (spec.md §5).

use crate::blob_store::BlobStore;
use crate::config::K;
use crate::contact::PeerContact;
use crate::error::HandlerError;
use crate::id::NodeId;
use crate::routing::RoutingTable;
use crate::token::TokenSecrets;
use crate::wire::messages::{MethodResult, NodeTriple, StoreArgs};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::net::Ipv4Addr;
use std::time::Duration;

pub fn handle_ping() -> MethodResult {
    MethodResult::Pong
}

/// Returns up to `2 * K` `(node_id, ip, udp_port)` triples (spec.md §4.6).
pub fn handle_find_node(
    routing: &RoutingTable,
    target: &NodeId,
    exclude_sender: Option<&NodeId>,
) -> MethodResult {
    let nodes = routing
        .find_close_peers(target, exclude_sender)
        .iter()
        .filter_map(NodeTriple::from_contact)
        .collect();
    MethodResult::Nodes(nodes)
}

/// Builds a `findValue` response: a fresh token, the first `K` find-node
/// contacts on page 0, a deterministic page of blob-hosting peers, and the
/// total page count (spec.md §4.6).
#[allow(clippy::too_many_arguments)]
pub fn handle_find_value(
    local_id: &NodeId,
    local_contact: Option<&PeerContact>,
    routing: &RoutingTable,
    blob_store: &mut BlobStore,
    token_secrets: &TokenSecrets,
    blob_id: &NodeId,
    page: u32,
    sender_ip: Ipv4Addr,
    exclude_sender: Option<&NodeId>,
    data_expiration: Duration,
) -> MethodResult {
    let token = token_secrets.issue(sender_ip);

    let contacts = if page == 0 {
        let mut nodes: Vec<NodeTriple> = routing
            .find_close_peers(blob_id, exclude_sender)
            .iter()
            .filter_map(NodeTriple::from_contact)
            .collect();
        nodes.truncate(K);
        Some(nodes)
    } else {
        None
    };

    let mut peers = blob_store.get_peers_for_blob(blob_id, data_expiration);
    if let Some(local) = local_contact {
        if blob_store.has_blob(blob_id) && peers.len() < K {
            peers.push(*local);
        }
    }

    // Deterministic shuffle so every caller sees the same page ordering,
    // seeded by the local node id (spec.md §4.6).
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&local_id.as_bytes()[..32]);
    let mut rng = StdRng::from_seed(seed);
    peers.shuffle(&mut rng);

    // Ground-truth formula from the original implementation's find_value()
    // (examples/original_source/lbry/lbry/dht/protocol/protocol.py): zero
    // pages for an empty peer list, otherwise `len // (k + 1) + 1`.
    let total_pages = if peers.is_empty() {
        0
    } else {
        (peers.len() / (K + 1) + 1) as u32
    };

    let start = (page as usize) * K;
    let blob_peers: Vec<[u8; 54]> = peers
        .iter()
        .skip(start)
        .take(K)
        .filter_map(PeerContact::compact_tcp_record)
        .collect();

    MethodResult::Value {
        token,
        contacts,
        blob_id: *blob_id,
        blob_peers: Some(blob_peers),
        total_pages,
    }
}

/// Validates and applies a `store` request (spec.md §4.6).
pub fn handle_store(
    args: &StoreArgs,
    sender: PeerContact,
    sender_ip: Ipv4Addr,
    token_secrets: &TokenSecrets,
    accept_previous: bool,
    in_startup_grace: bool,
    blob_store: &mut BlobStore,
) -> Result<MethodResult, HandlerError> {
    if args.tcp_port == 0 {
        return Err(HandlerError::InvalidArguments("tcp_port must be 1..=65535".into()));
    }
    if !in_startup_grace && !token_secrets.verify(&args.token, sender_ip, accept_previous) {
        return Err(HandlerError::InvalidArguments("invalid token".into()));
    }

    let updated = sender
        .with_tcp_port(args.tcp_port)
        .map_err(|e| HandlerError::InvalidArguments(e.to_string()))?;
    blob_store.add_peer_for_blob(updated, args.blob_hash);
    Ok(MethodResult::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn ping_handler_returns_pong() {
        assert_eq!(handle_ping(), MethodResult::Pong);
    }

    #[test]
    fn store_rejects_zero_tcp_port() {
        let mut store = BlobStore::new();
        let secrets = TokenSecrets::new(std::time::Duration::from_secs(300));
        let sender = PeerContact::new(
            Some(NodeId::generate()),
            Ipv4Addr::LOCALHOST,
            6881,
            None,
            1,
        )
        .unwrap();
        let args = StoreArgs {
            blob_hash: NodeId::generate(),
            token: secrets.issue(Ipv4Addr::LOCALHOST),
            tcp_port: 0,
        };
        let err = handle_store(&args, sender, Ipv4Addr::LOCALHOST, &secrets, true, false, &mut store)
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidArguments(_)));
    }

    #[test]
    fn store_rejects_invalid_token_outside_grace() {
        let mut store = BlobStore::new();
        let secrets = TokenSecrets::new(std::time::Duration::from_secs(300));
        let sender = PeerContact::new(
            Some(NodeId::generate()),
            Ipv4Addr::LOCALHOST,
            6881,
            None,
            1,
        )
        .unwrap();
        let args = StoreArgs {
            blob_hash: NodeId::generate(),
            token: [0xAAu8; crate::config::TOKEN_LEN],
            tcp_port: 1234,
        };
        let err = handle_store(&args, sender, Ipv4Addr::LOCALHOST, &secrets, true, false, &mut store)
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidArguments(_)));
    }

    #[test]
    fn store_accepts_bad_token_during_startup_grace() {
        let mut store = BlobStore::new();
        let secrets = TokenSecrets::new(std::time::Duration::from_secs(300));
        let sender = PeerContact::new(
            Some(NodeId::generate()),
            Ipv4Addr::LOCALHOST,
            6881,
            None,
            1,
        )
        .unwrap();
        let args = StoreArgs {
            blob_hash: NodeId::generate(),
            token: [0xAAu8; crate::config::TOKEN_LEN],
            tcp_port: 1234,
        };
        let result = handle_store(&args, sender, Ipv4Addr::LOCALHOST, &secrets, true, true, &mut store);
        assert!(result.is_ok());
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn store_then_find_value_surfaces_the_new_peer() {
        let local_id = NodeId::generate();
        let mut store = BlobStore::new();
        let secrets = TokenSecrets::new(std::time::Duration::from_secs(300));
        let routing = RoutingTable::new(local_id, Config::default().split_buckets_under_index);
        let blob_id = NodeId::generate();
        let sender_ip = Ipv4Addr::new(10, 0, 0, 5);
        let token = secrets.issue(sender_ip);
        let sender = PeerContact::new(Some(NodeId::generate()), sender_ip, 6881, None, 1).unwrap();

        let args = StoreArgs { blob_hash: blob_id, token, tcp_port: 4242 };
        handle_store(&args, sender, sender_ip, &secrets, true, false, &mut store).unwrap();

        let result = handle_find_value(
            &local_id,
            None,
            &routing,
            &mut store,
            &secrets,
            &blob_id,
            0,
            sender_ip,
            None,
            std::time::Duration::from_secs(3600),
        );
        match result {
            MethodResult::Value { blob_peers, .. } => {
                let peers = blob_peers.unwrap();
                assert_eq!(peers.len(), 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
