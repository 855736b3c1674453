//! Iterative `findNode` / `findValue` convergence (spec.md §4.8).
//!
//! The driver's contract with the RPC layer is purely a function from
//! `send_request` — it never reaches into the pending table directly.

use crate::config::{ALPHA, K, TOKEN_LEN};
use crate::contact::PeerContact;
use crate::id::{closer, NodeId};
use crate::rpc::RpcLayer;
use crate::wire::messages::{MethodCall, MethodResult, NodeTriple};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of an [`iterative_find_value`] lookup.
pub enum LookupOutcome {
    /// No value found; the K nearest contacts discovered along the way.
    Nodes(Vec<PeerContact>),
    /// The target blob's advertising peers, plus the token needed to
    /// `store` against whichever node returned it.
    Value {
        token: [u8; TOKEN_LEN],
        peers: Vec<PeerContact>,
    },
}

fn node_triple_to_contact(t: &NodeTriple) -> PeerContact {
    PeerContact::new(Some(t.node_id), t.ip, t.udp_port, None, 1)
        .expect("wire-decoded triples always carry a valid udp_port")
}

fn merge_shortlist(shortlist: &mut Vec<PeerContact>, target: &NodeId, fresh: Vec<PeerContact>) {
    for peer in fresh {
        if !shortlist.iter().any(|p| p.node_id() == peer.node_id()) {
            shortlist.push(peer);
        }
    }
    shortlist.sort_by(|a, b| {
        let a_id = a.node_id().expect("lookup contacts always carry a node_id");
        let b_id = b.node_id().expect("lookup contacts always carry a node_id");
        if closer(target, &a_id, &b_id) {
            std::cmp::Ordering::Less
        } else if closer(target, &b_id, &a_id) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
    shortlist.truncate(2 * K);
}

fn pick_next_batch(
    shortlist: &[PeerContact],
    queried: &HashSet<NodeId>,
    count: usize,
) -> Vec<PeerContact> {
    shortlist
        .iter()
        .filter(|p| p.node_id().map(|id| !queried.contains(&id)).unwrap_or(false))
        .take(count)
        .copied()
        .collect()
}

/// Converges on the `K` nodes closest to `target` (spec.md §4.8).
pub async fn iterative_find_node(rpc: &Arc<RpcLayer>, target: NodeId) -> Vec<PeerContact> {
    let mut shortlist = { rpc.routing.lock().await.find_close_peers(&target, None) };
    let mut queried: HashSet<NodeId> = HashSet::new();

    loop {
        let batch = pick_next_batch(&shortlist, &queried, ALPHA);
        if batch.is_empty() {
            break;
        }
        for peer in &batch {
            if let Some(id) = peer.node_id() {
                queried.insert(id);
            }
        }

        let closest_before = shortlist.first().and_then(|p| p.node_id());
        let responses = join_all(batch.iter().map(|peer| {
            let rpc = rpc.clone();
            let peer = *peer;
            async move { rpc.send_request(peer, MethodCall::FindNode { target }).await }
        }))
        .await;

        let mut fresh = Vec::new();
        for response in responses {
            if let Ok(MethodResult::Nodes(nodes)) = response {
                fresh.extend(nodes.iter().map(node_triple_to_contact));
            }
        }
        merge_shortlist(&mut shortlist, &target, fresh);

        let closest_after = shortlist.first().and_then(|p| p.node_id());
        if closest_after == closest_before {
            break;
        }
    }

    shortlist.truncate(K);
    shortlist
}

/// Converges on `blob_id`, returning early once a value-bearing response
/// arrives (spec.md §4.8).
pub async fn iterative_find_value(rpc: &Arc<RpcLayer>, blob_id: NodeId) -> LookupOutcome {
    let mut shortlist = { rpc.routing.lock().await.find_close_peers(&blob_id, None) };
    let mut queried: HashSet<NodeId> = HashSet::new();

    loop {
        let batch = pick_next_batch(&shortlist, &queried, ALPHA);
        if batch.is_empty() {
            break;
        }
        for peer in &batch {
            if let Some(id) = peer.node_id() {
                queried.insert(id);
            }
        }

        let closest_before = shortlist.first().and_then(|p| p.node_id());
        let responses = join_all(batch.iter().map(|peer| {
            let rpc = rpc.clone();
            let peer = *peer;
            async move { (peer, rpc.send_request(peer, MethodCall::FindValue { blob_id, page: 0 }).await) }
        }))
        .await;

        let mut fresh = Vec::new();
        for (source, response) in responses {
            match response {
                Ok(MethodResult::Value { token, contacts, blob_peers, .. }) => {
                    let has_peers = blob_peers.as_ref().map(|p| !p.is_empty()).unwrap_or(false);
                    if has_peers {
                        let mut peers: Vec<PeerContact> = blob_peers
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|record| compact_record_to_contact(record))
                            .collect();
                        if peers.is_empty() {
                            // Fall through to source as a last resort so a
                            // positive-but-unparseable record isn't lost.
                            peers.push(source);
                        }
                        return LookupOutcome::Value { token, peers };
                    }
                    if let Some(contacts) = contacts {
                        fresh.extend(contacts.iter().map(node_triple_to_contact));
                    }
                }
                _ => continue,
            }
        }
        merge_shortlist(&mut shortlist, &blob_id, fresh);

        let closest_after = shortlist.first().and_then(|p| p.node_id());
        if closest_after == closest_before {
            break;
        }
    }

    shortlist.truncate(K);
    LookupOutcome::Nodes(shortlist)
}

fn compact_record_to_contact(record: &[u8; 54]) -> Option<PeerContact> {
    let ip = std::net::Ipv4Addr::new(record[0], record[1], record[2], record[3]);
    let port = u16::from_be_bytes([record[4], record[5]]);
    let mut node_id_bytes = [0u8; crate::config::ID_BYTE_LEN];
    node_id_bytes.copy_from_slice(&record[6..]);
    let node_id = NodeId::from_bytes(node_id_bytes);
    PeerContact::new(Some(node_id), ip, port, Some(port), 1).ok()
}

/// `findValue` followed by `store`, retrying once with a fresh token if
/// the first attempt is rejected for an invalid token — the one-shot
/// retry policy documented for this historically ambiguous behavior
/// (spec.md §9 Open Questions; SPEC_FULL.md).
pub async fn announce(
    rpc: &Arc<RpcLayer>,
    blob_id: NodeId,
    tcp_port: u16,
) -> Result<(), crate::error::RpcError> {
    let nearest = iterative_find_node(rpc, blob_id).await;
    for peer in nearest {
        let find_result = rpc.send_request(peer, MethodCall::FindValue { blob_id, page: 0 }).await;
        let Ok(MethodResult::Value { token, .. }) = find_result else {
            continue;
        };
        let store_call = MethodCall::Store(crate::wire::messages::StoreArgs {
            blob_hash: blob_id,
            token,
            tcp_port,
        });
        match rpc.send_request(peer, store_call).await {
            Ok(_) => continue,
            Err(crate::error::RpcError::RemoteException { exception_type, .. })
                if exception_type == "InvalidArguments" =>
            {
                // Token rotated between findValue and store; retry once
                // with a freshly issued token (one-shot retry, spec.md §9).
                if let Ok(MethodResult::Value { token, .. }) =
                    rpc.send_request(peer, MethodCall::FindValue { blob_id, page: 0 }).await
                {
                    let retry_call = MethodCall::Store(crate::wire::messages::StoreArgs {
                        blob_hash: blob_id,
                        token,
                        tcp_port,
                    });
                    let _ = rpc.send_request(peer, retry_call).await;
                }
            }
            Err(_) => continue,
        }
    }
    Ok(())
}
