//! RPC layer: UDP transport, pending-request table, dispatch (spec.md §4.6).

pub mod handlers;
pub mod pending;

use crate::blob_store::BlobStore;
use crate::config::{Config, RPC_ID_LEN};
use crate::contact::PeerContact;
use crate::error::{CodecError, DhtError, HandlerError, RpcError};
use crate::id::NodeId;
use crate::peer_manager::{Liveness, PeerManager};
use crate::ping_queue::PingQueue;
use crate::routing::{self, RoutingTable};
use crate::token::TokenSecrets;
use crate::wire::messages::{Frame, MethodCall, MethodResult, RpcId, StoreArgs};
use pending::PendingTable;
use rand::RngCore;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Owns the UDP socket and every piece of mutable node state the wire
/// protocol touches: the pending-request table, routing table, peer
/// manager, blob store, and token secrets (spec.md §4.6, §5).
pub struct RpcLayer {
    socket: UdpSocket,
    local_id: NodeId,
    local_contact: Mutex<Option<PeerContact>>,
    config: Config,
    started_at: Instant,
    pending: Mutex<PendingTable>,
    pub routing: Mutex<RoutingTable>,
    pub peer_manager: Mutex<PeerManager>,
    pub blob_store: Mutex<BlobStore>,
    pub token_secrets: Mutex<TokenSecrets>,
    pub ping_queue: Mutex<PingQueue>,
}

impl RpcLayer {
    pub async fn bind(config: Config, local_id: NodeId) -> Result<Arc<Self>, DhtError> {
        let socket = UdpSocket::bind(config.listen_addr).await?;
        let token_secrets = TokenSecrets::new(config.token_secret_refresh_interval);
        let layer = RpcLayer {
            socket,
            local_id,
            local_contact: Mutex::new(None),
            routing: Mutex::new(RoutingTable::new(local_id, config.split_buckets_under_index)),
            peer_manager: Mutex::new(PeerManager::new(&config)),
            blob_store: Mutex::new(BlobStore::new()),
            token_secrets: Mutex::new(token_secrets),
            ping_queue: Mutex::new(PingQueue::new(config.maybe_ping_delay)),
            started_at: Instant::now(),
            config,
        };
        Ok(Arc::new(layer))
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn set_local_contact(&self, contact: PeerContact) {
        *self.local_contact.lock().await = Some(contact);
    }

    /// A node just past startup hasn't necessarily seen the requester's
    /// earlier `findValue` token issuance, so `store` tolerates an
    /// unverifiable token for one full secret-refresh window (spec.md
    /// §4.6, §7; `examples/original_source/lbry/lbry/dht/protocol/protocol.py`'s
    /// `started_listening_time` grace tied to `token_secret_refresh_interval`).
    pub fn in_startup_grace(&self) -> bool {
        self.started_at.elapsed() < self.config.token_secret_refresh_interval
    }

    /// Sends `call` to `peer` and awaits the matching response, a remote
    /// error, a timeout, or cancellation (spec.md §4.6 Outbound request flow).
    pub async fn send_request(
        self: &Arc<Self>,
        peer: PeerContact,
        call: MethodCall,
    ) -> Result<MethodResult, RpcError> {
        if peer.node_id() == Some(self.local_id) {
            return Err(RpcError::SelfLoop);
        }

        let mut rpc_id: RpcId = [0u8; RPC_ID_LEN];
        rand::thread_rng().fill_bytes(&mut rpc_id);
        let frame = Frame::Request { rpc_id, node_id: self.local_id, call };
        let bytes = crate::wire::encode(&frame).map_err(|e| match e {
            CodecError::Oversized(got, _limit) => RpcError::Oversized(got),
            other => RpcError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string())),
        })?;

        let addr = peer.udp_socket_addr();
        let rx = {
            let mut pending = self.pending.lock().await;
            pending.insert(rpc_id, addr, peer.node_id())
        };

        self.socket.send_to(&bytes, addr).await?;
        {
            let mut pm = self.peer_manager.lock().await;
            pm.record_sent(peer.address_key());
        }

        match tokio::time::timeout(self.config.rpc_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => {
                self.pending.lock().await.remove(&rpc_id);
                let mut pm = self.peer_manager.lock().await;
                pm.record_failure(peer.address_key());
                if matches!(pm.peer_is_good(peer.address_key()), Liveness::Bad) {
                    if let Some(node_id) = peer.node_id() {
                        drop(pm);
                        self.routing.lock().await.remove_peer(&node_id);
                    }
                }
                Err(RpcError::Timeout)
            }
        }
    }

    /// Runs the inbound receive loop until the socket errors out. Intended
    /// to run as a cooperative task on the node's single event loop
    /// (spec.md §5).
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; crate::config::MSG_SIZE_LIMIT + 1];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "udp recv failed, stopping rpc loop");
                    return;
                }
            };
            self.clone().handle_datagram(&buf[..len], addr).await;
        }
    }

    async fn handle_datagram(self: Arc<Self>, bytes: &[u8], addr: SocketAddr) {
        let frame = match crate::wire::decode(bytes) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, %addr, "malformed datagram, dropping");
                if let SocketAddr::V4(v4) = addr {
                    self.peer_manager.lock().await.record_failure((*v4.ip(), v4.port()));
                }
                return;
            }
        };

        match frame {
            Frame::Request { rpc_id, node_id, call } => {
                self.handle_request(rpc_id, node_id, call, addr).await;
            }
            Frame::Response { rpc_id, node_id, result } => {
                self.resolve_response(rpc_id, node_id, addr, result).await;
            }
            Frame::Error { rpc_id, exception_type, message, .. } => {
                let mut pending = self.pending.lock().await;
                pending.complete(&rpc_id, Err(RpcError::RemoteException { exception_type, message }));
            }
        }
    }

    async fn resolve_response(&self, rpc_id: RpcId, node_id: NodeId, addr: SocketAddr, result: MethodResult) {
        let expected = {
            let pending = self.pending.lock().await;
            pending.get(&rpc_id).map(|e| (e.expected_addr, e.expected_node_id))
        };
        let Some((expected_addr, expected_node_id)) = expected else {
            return;
        };
        if node_id == self.local_id {
            self.pending.lock().await.complete(&rpc_id, Err(RpcError::SelfLoop));
            return;
        }
        if addr != expected_addr {
            self.pending
                .lock()
                .await
                .complete(&rpc_id, Err(RpcError::UnexpectedSource { expected: expected_addr, actual: addr }));
            return;
        }
        if let Some(expected_id) = expected_node_id {
            if expected_id != node_id {
                self.pending.lock().await.complete(
                    &rpc_id,
                    Err(RpcError::UnexpectedSource { expected: expected_addr, actual: addr }),
                );
                return;
            }
        }

        if let SocketAddr::V4(v4) = addr {
            let key = (*v4.ip(), v4.port());
            let mut pm = self.peer_manager.lock().await;
            pm.record_replied(key);
            pm.bind_node_id(node_id, key);
        }

        self.pending.lock().await.complete(&rpc_id, Ok(result));
    }

    async fn handle_request(self: Arc<Self>, rpc_id: RpcId, node_id: NodeId, call: MethodCall, addr: SocketAddr) {
        let SocketAddr::V4(v4) = addr else {
            return;
        };
        let sender_ip = *v4.ip();
        let sender_port = v4.port();
        {
            self.peer_manager.lock().await.record_requested((sender_ip, sender_port));
        }

        let sender_contact = match PeerContact::new(Some(node_id), sender_ip, sender_port, None, 1) {
            Ok(c) => c,
            Err(e) => {
                self.send_error(rpc_id, addr, "InvalidArguments", &e.to_string()).await;
                return;
            }
        };

        let outcome = self.dispatch(&call, sender_contact, sender_ip).await;
        match outcome {
            Ok(result) => {
                let frame = Frame::Response { rpc_id, node_id: self.local_id, result };
                self.send_frame(&frame, addr).await;
            }
            Err(e) => {
                self.send_error(rpc_id, addr, "InvalidArguments", &e.to_string()).await;
            }
        }

        self.post_request_liveness(sender_contact, (sender_ip, sender_port)).await;
    }

    async fn dispatch(
        &self,
        call: &MethodCall,
        sender_contact: PeerContact,
        sender_ip: Ipv4Addr,
    ) -> Result<MethodResult, HandlerError> {
        match call {
            MethodCall::Ping => Ok(handlers::handle_ping()),
            MethodCall::FindNode { target } => {
                let routing = self.routing.lock().await;
                Ok(handlers::handle_find_node(&routing, target, sender_contact.node_id().as_ref()))
            }
            MethodCall::FindValue { blob_id, page } => {
                let local_contact = self.local_contact.lock().await.clone();
                let routing = self.routing.lock().await;
                let mut blob_store = self.blob_store.lock().await;
                let token_secrets = self.token_secrets.lock().await;
                Ok(handlers::handle_find_value(
                    &self.local_id,
                    local_contact.as_ref(),
                    &routing,
                    &mut blob_store,
                    &token_secrets,
                    blob_id,
                    *page,
                    sender_ip,
                    sender_contact.node_id().as_ref(),
                    self.config.data_expiration,
                ))
            }
            MethodCall::Store(args) => self.dispatch_store(args, sender_contact, sender_ip).await,
        }
    }

    async fn dispatch_store(
        &self,
        args: &StoreArgs,
        sender_contact: PeerContact,
        sender_ip: Ipv4Addr,
    ) -> Result<MethodResult, HandlerError> {
        let token_secrets = self.token_secrets.lock().await;
        let mut blob_store = self.blob_store.lock().await;
        handlers::handle_store(
            args,
            sender_contact,
            sender_ip,
            &token_secrets,
            self.config.accept_previous_token_secret,
            self.in_startup_grace(),
            &mut blob_store,
        )
    }

    async fn post_request_liveness(&self, sender_contact: PeerContact, key: (Ipv4Addr, u16)) {
        let liveness = self.peer_manager.lock().await.peer_is_good(key);
        match liveness {
            Liveness::Unknown => {
                self.ping_queue.lock().await.enqueue_maybe_ping(sender_contact);
            }
            Liveness::Good => {
                let is_stale = |p: &PeerContact| {
                    self.peer_manager
                        .try_lock()
                        .map(|pm| pm.is_stale_eviction_candidate(p.address_key(), crate::config::EVICTION_PROBE_WINDOW))
                        .unwrap_or(false)
                };
                let probe = |_candidate: PeerContact| async { false };
                routing::add_peer(&self.routing, sender_contact, is_stale, probe).await;
            }
            Liveness::Bad => {}
        }
    }

    async fn send_frame(&self, frame: &Frame, addr: SocketAddr) {
        match crate::wire::encode(frame) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, addr).await {
                    warn!(error = %e, %addr, "failed to send response datagram");
                }
            }
            Err(e) => warn!(error = %e, %addr, "failed to encode response datagram"),
        }
    }

    async fn send_error(&self, rpc_id: RpcId, addr: SocketAddr, exception_type: &str, message: &str) {
        let frame = Frame::Error {
            rpc_id,
            node_id: self.local_id,
            exception_type: exception_type.to_string(),
            message: message.to_string(),
        };
        self.send_frame(&frame, addr).await;
    }
}
