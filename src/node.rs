//! The top-level DHT node: wires the RPC layer to the background
//! cooperative tasks that keep it healthy (spec.md §2, §5).

use crate::config::Config;
use crate::contact::PeerContact;
use crate::error::DhtError;
use crate::id::NodeId;
use crate::peer_manager::Liveness;
use crate::routing;
use crate::rpc::RpcLayer;
use crate::wire::messages::MethodCall;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A running node: the bound RPC layer plus handles to its background
/// tasks (spec.md §5 "single-threaded cooperative" task loop).
pub struct Node {
    pub rpc: Arc<RpcLayer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Binds the UDP socket and starts the recv loop, ping worker, token
    /// rotation, and routing-table maintenance as cooperative tasks.
    pub async fn start(config: Config, local_id: NodeId) -> Result<Self, DhtError> {
        let rpc = RpcLayer::bind(config, local_id).await?;

        if let Ok(std::net::SocketAddr::V4(v4)) = rpc.local_addr() {
            if let Ok(contact) = PeerContact::new(Some(local_id), *v4.ip(), v4.port(), Some(v4.port()), 1) {
                rpc.set_local_contact(contact).await;
            }
        }

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(rpc.clone().run()));
        tasks.push(tokio::spawn(token_rotation_task(rpc.clone())));
        tasks.push(tokio::spawn(ping_worker_task(rpc.clone())));
        tasks.push(tokio::spawn(routing_maintenance_task(rpc.clone())));
        tasks.push(tokio::spawn(blob_expiry_task(rpc.clone())));
        tasks.push(tokio::spawn(peer_manager_prune_task(rpc.clone())));

        Ok(Node { rpc, tasks })
    }

    pub fn local_id(&self) -> NodeId {
        self.rpc.local_id()
    }

    pub async fn find_node(&self, target: NodeId) -> Vec<PeerContact> {
        crate::lookup::iterative_find_node(&self.rpc, target).await
    }

    pub async fn find_value(&self, blob_id: NodeId) -> crate::lookup::LookupOutcome {
        crate::lookup::iterative_find_value(&self.rpc, blob_id).await
    }

    pub async fn announce(&self, blob_id: NodeId, tcp_port: u16) -> Result<(), crate::error::RpcError> {
        crate::lookup::announce(&self.rpc, blob_id, tcp_port).await
    }

    /// Seeds the routing table with a known peer, probing it first (spec.md
    /// §4.3 insertion algorithm, §9 bootstrap via known-seed peers).
    pub async fn add_seed_peer(&self, peer: PeerContact) -> bool {
        let rpc = self.rpc.clone();
        let is_stale = stale_candidate_check(rpc.clone());
        let probe = move |candidate: PeerContact| {
            let rpc = rpc.clone();
            async move {
                matches!(
                    rpc.send_request(candidate, MethodCall::Ping).await,
                    Err(crate::error::RpcError::Timeout)
                )
            }
        };
        routing::add_peer(&self.rpc.routing, peer, is_stale, probe).await
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Builds the full-bucket eviction-candidate predicate (spec.md §4.3 step
/// 4): bad/unknown by the peer manager and not replied-to recently. Uses
/// `try_lock` since it runs as a plain sync closure from inside the
/// routing table's own lock guard.
fn stale_candidate_check(rpc: Arc<RpcLayer>) -> impl Fn(&PeerContact) -> bool {
    move |p: &PeerContact| {
        rpc.peer_manager
            .try_lock()
            .map(|pm| pm.is_stale_eviction_candidate(p.address_key(), crate::config::EVICTION_PROBE_WINDOW))
            .unwrap_or(false)
    }
}

async fn token_rotation_task(rpc: Arc<RpcLayer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        rpc.token_secrets.lock().await.maybe_rotate();
    }
}

async fn ping_worker_task(rpc: Arc<RpcLayer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let Some(peer) = rpc.ping_queue.lock().await.pop_due() else { continue };

        let already_good = matches!(
            rpc.peer_manager.lock().await.peer_is_good(peer.address_key()),
            Liveness::Good
        );
        if already_good {
            let in_table = match peer.node_id() {
                Some(id) => rpc.routing.lock().await.get_peer(&id).is_some(),
                None => false,
            };
            if !in_table {
                let is_stale = stale_candidate_check(rpc.clone());
                let probe = |_candidate: PeerContact| async { false };
                routing::add_peer(&rpc.routing, peer, is_stale, probe).await;
            }
            continue;
        }

        debug!(addr = %peer.udp_socket_addr(), "probing ping-queue candidate");
        let _ = rpc.send_request(peer, MethodCall::Ping).await;
    }
}

async fn routing_maintenance_task(rpc: Arc<RpcLayer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let stale_after = rpc.config().check_refresh_interval;
        let targets = { rpc.routing.lock().await.buckets_to_refresh(stale_after) };
        for target in targets {
            info!(?target, "refreshing stale bucket");
            let _ = crate::lookup::iterative_find_node(&rpc, target).await;
        }
    }
}

async fn blob_expiry_task(rpc: Arc<RpcLayer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
    loop {
        interval.tick().await;
        let data_expiration = rpc.config().data_expiration;
        rpc.blob_store.lock().await.remove_expired(data_expiration);
    }
}

async fn peer_manager_prune_task(rpc: Arc<RpcLayer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
    loop {
        interval.tick().await;
        let prune_after = rpc.config().peer_manager_prune_after;
        rpc.peer_manager.lock().await.prune(prune_after);
    }
}
