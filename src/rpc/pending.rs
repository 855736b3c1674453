//! The outbound pending-request table (spec.md §3 `PendingRequest`, §4.6).

use crate::error::RpcError;
use crate::id::NodeId;
use crate::wire::messages::{MethodResult, RpcId};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// A single in-flight outbound request awaiting a response, error, timeout,
/// or cancellation (spec.md §3). Exactly one completion path is taken.
pub struct PendingRequest {
    pub expected_addr: SocketAddr,
    pub expected_node_id: Option<NodeId>,
    completion: oneshot::Sender<Result<MethodResult, RpcError>>,
}

/// Keyed by `rpc_id`; at most one entry per id (spec.md §3 invariant).
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<RpcId, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable::default()
    }

    pub fn insert(
        &mut self,
        rpc_id: RpcId,
        expected_addr: SocketAddr,
        expected_node_id: Option<NodeId>,
    ) -> oneshot::Receiver<Result<MethodResult, RpcError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            rpc_id,
            PendingRequest { expected_addr, expected_node_id, completion: tx },
        );
        rx
    }

    /// Removes and completes the entry for `rpc_id`, if still present. A
    /// duplicate or late-arriving datagram for an already-resolved
    /// `rpc_id` is silently ignored (spec.md §5, UDP duplicates).
    pub fn complete(&mut self, rpc_id: &RpcId, result: Result<MethodResult, RpcError>) {
        if let Some(entry) = self.entries.remove(rpc_id) {
            let _ = entry.completion.send(result);
        }
    }

    /// Removes the entry without completing it, e.g. when a timeout has
    /// already resolved the sink through the `tokio::time::timeout` wrapper
    /// around the receiver (spec.md §5, cancellation semantics).
    pub fn remove(&mut self, rpc_id: &RpcId) -> Option<PendingRequest> {
        self.entries.remove(rpc_id)
    }

    pub fn get(&self, rpc_id: &RpcId) -> Option<&PendingRequest> {
        self.entries.get(rpc_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_complete_resolves_receiver() {
        let mut table = PendingTable::new();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let rx = table.insert([1u8; 20], addr, None);
        table.complete(&[1u8; 20], Ok(MethodResult::Pong));
        let result = rx.await.unwrap();
        assert!(matches!(result, Ok(MethodResult::Pong)));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn completing_unknown_rpc_id_is_a_no_op() {
        let mut table = PendingTable::new();
        table.complete(&[9u8; 20], Ok(MethodResult::Pong));
        assert!(table.is_empty());
    }
}
