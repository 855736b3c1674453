//! Tunables for the DHT core, collected the way `ant-networking`'s
//! `NetworkConfig` collects knobs for the network driver.

use std::net::SocketAddr;
use std::time::Duration;

/// Bucket capacity (spec.md §3, GLOSSARY).
pub const K: usize = 8;

/// Iterative lookup parallelism (spec.md §4.8, GLOSSARY).
pub const ALPHA: usize = 3;

/// Maximum serialized datagram size, in bytes (spec.md §4.2).
pub const MSG_SIZE_LIMIT: usize = 1400;

/// Length in bytes of a blob hash / node id (spec.md §6).
pub const ID_BYTE_LEN: usize = 48;

/// Length in bytes of an rpc_id (spec.md §6).
pub const RPC_ID_LEN: usize = 20;

/// Length in bytes of a store token (spec.md §3).
pub const TOKEN_LEN: usize = 48;

/// How recently a bucket-full eviction candidate must have replied to be
/// considered fresh rather than a stale eviction candidate (spec.md §4.3
/// step 4).
pub const EVICTION_PROBE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    /// Local UDP listen address.
    pub listen_addr: SocketAddr,
    /// Request/response timeout (spec.md §5).
    pub rpc_timeout: Duration,
    /// Token secret rotation interval (spec.md §5).
    pub token_secret_refresh_interval: Duration,
    /// Default delay before a candidate is probed by the ping queue (spec.md §4.7).
    pub maybe_ping_delay: Duration,
    /// Freshness window used by `peer_is_good` (spec.md §4.5).
    pub check_refresh_interval: Duration,
    /// Blob store entry TTL (spec.md §3, §4.4).
    pub data_expiration: Duration,
    /// Floor on bucket depth under which splitting is always permitted,
    /// regardless of whether the local ID falls in the bucket's range
    /// (spec.md §4.3, `SPLIT_BUCKETS_UNDER_INDEX`).
    pub split_buckets_under_index: usize,
    /// Whether `store` accepts tokens issued under the *previous* secret as
    /// well as the current one (spec.md §9, Open Question). Gated behind a
    /// flag so tests can pin either interpretation.
    pub accept_previous_token_secret: bool,
    /// How long an address entry may sit idle in the peer manager before
    /// `PeerManager::prune` drops it (ambient housekeeping, SPEC_FULL.md).
    pub peer_manager_prune_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:0".parse().expect("valid default addr"),
            rpc_timeout: Duration::from_secs(5),
            token_secret_refresh_interval: Duration::from_secs(5 * 60),
            maybe_ping_delay: Duration::from_secs(60),
            check_refresh_interval: Duration::from_secs(15 * 60),
            data_expiration: Duration::from_secs(60 * 60),
            split_buckets_under_index: 1,
            accept_previous_token_secret: true,
            peer_manager_prune_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}
