//! Per-address liveness bookkeeping and token cache (spec.md §3, §4.5).

use crate::config::Config;
use crate::id::NodeId;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Result of [`PeerManager::peer_is_good`] (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Good,
    Unknown,
    Bad,
}

#[derive(Debug, Default)]
struct AddressState {
    last_sent: Option<Instant>,
    last_replied: Option<Instant>,
    last_requested: Option<Instant>,
    /// The two most recent RPC failure timestamps, oldest first.
    rpc_failures: Vec<Instant>,
    node_id: Option<NodeId>,
}

impl AddressState {
    fn record_failure(&mut self, at: Instant) {
        self.rpc_failures.push(at);
        if self.rpc_failures.len() > 2 {
            self.rpc_failures.remove(0);
        }
    }

    fn most_recent_failure(&self) -> Option<Instant> {
        self.rpc_failures.last().copied()
    }
}

struct TokenEntry {
    issued_at: Instant,
    token: [u8; crate::config::TOKEN_LEN],
}

/// Tracks per-address liveness, the address/node_id bijection, and the
/// short-lived tokens issued to each peer (spec.md §4.5).
pub struct PeerManager {
    addresses: HashMap<(Ipv4Addr, u16), AddressState>,
    node_id_forward: HashMap<NodeId, (Ipv4Addr, u16)>,
    node_tokens: HashMap<NodeId, TokenEntry>,
    check_refresh_interval: Duration,
    token_ttl: Duration,
}

impl PeerManager {
    pub fn new(config: &Config) -> Self {
        PeerManager {
            addresses: HashMap::new(),
            node_id_forward: HashMap::new(),
            node_tokens: HashMap::new(),
            check_refresh_interval: config.check_refresh_interval,
            token_ttl: config.token_secret_refresh_interval,
        }
    }

    /// Associates `node_id` with `address`, evicting whichever stale entry
    /// conflicts on either side of the mapping (spec.md §4.5,
    /// `node_id_forward` / `node_id_reverse`).
    pub fn bind_node_id(&mut self, node_id: NodeId, address: (Ipv4Addr, u16)) {
        if let Some(prev_addr) = self.node_id_forward.get(&node_id).copied() {
            if prev_addr != address {
                self.addresses.remove(&prev_addr);
                self.node_id_forward.remove(&node_id);
            }
        }
        if let Some(state) = self.addresses.get(&address) {
            if let Some(prev_id) = state.node_id {
                if prev_id != node_id {
                    self.node_id_forward.remove(&prev_id);
                }
            }
        }
        let state = self.addresses.entry(address).or_default();
        state.node_id = Some(node_id);
        self.node_id_forward.insert(node_id, address);
    }

    pub fn record_sent(&mut self, address: (Ipv4Addr, u16)) {
        self.addresses.entry(address).or_default().last_sent = Some(Instant::now());
    }

    pub fn record_replied(&mut self, address: (Ipv4Addr, u16)) {
        self.addresses.entry(address).or_default().last_replied = Some(Instant::now());
    }

    pub fn record_requested(&mut self, address: (Ipv4Addr, u16)) {
        self.addresses.entry(address).or_default().last_requested = Some(Instant::now());
    }

    pub fn record_failure(&mut self, address: (Ipv4Addr, u16)) {
        self.addresses
            .entry(address)
            .or_default()
            .record_failure(Instant::now());
    }

    /// Classifies an address per the decision table in spec.md §4.5.
    pub fn peer_is_good(&self, address: (Ipv4Addr, u16)) -> Liveness {
        let Some(state) = self.addresses.get(&address) else {
            return Liveness::Unknown;
        };
        let delay = self.check_refresh_interval;
        let most_recent_failure = state.most_recent_failure();

        if let Some(replied) = state.last_replied {
            let fresh = replied.elapsed() < delay;
            let replied_after_failure = most_recent_failure
                .map(|f| replied > f)
                .unwrap_or(true);
            if fresh {
                return Liveness::Good;
            }
            if replied_after_failure {
                return Liveness::Unknown;
            }
            return Liveness::Bad;
        }

        if state.rpc_failures.len() >= 2 {
            if let Some(recent) = most_recent_failure {
                if recent.elapsed() > delay {
                    return Liveness::Unknown;
                }
            }
            return Liveness::Bad;
        }

        if let Some(requested) = state.last_requested {
            if requested.elapsed() < delay {
                return Liveness::Unknown;
            }
        }

        Liveness::Unknown
    }

    /// True if `address` is classified bad/unknown and hasn't replied
    /// within `not_replied_within` — the eviction-candidate test a full
    /// bucket uses before probing a peer out (spec.md §4.3 step 4).
    pub fn is_stale_eviction_candidate(&self, address: (Ipv4Addr, u16), not_replied_within: Duration) -> bool {
        if matches!(self.peer_is_good(address), Liveness::Good) {
            return false;
        }
        match self.addresses.get(&address).and_then(|s| s.last_replied) {
            Some(replied) => replied.elapsed() >= not_replied_within,
            None => true,
        }
    }

    /// Caches a token issued to `node_id`, expiring after the configured
    /// token secret refresh interval (spec.md §4.5 `node_tokens`).
    pub fn cache_token(&mut self, node_id: NodeId, token: [u8; crate::config::TOKEN_LEN]) {
        self.node_tokens.insert(
            node_id,
            TokenEntry {
                issued_at: Instant::now(),
                token,
            },
        );
    }

    pub fn cached_token(&self, node_id: &NodeId) -> Option<[u8; crate::config::TOKEN_LEN]> {
        let entry = self.node_tokens.get(node_id)?;
        if entry.issued_at.elapsed() > self.token_ttl {
            return None;
        }
        Some(entry.token)
    }

    /// Drops address entries that have seen no activity for
    /// `Config::peer_manager_prune_after` (ambient housekeeping,
    /// SPEC_FULL.md; not part of the routing-table liveness contract).
    pub fn prune(&mut self, prune_after: Duration) {
        let now = Instant::now();
        let stale: Vec<(Ipv4Addr, u16)> = self
            .addresses
            .iter()
            .filter(|(_, state)| {
                let last_activity = [state.last_sent, state.last_replied, state.last_requested]
                    .into_iter()
                    .flatten()
                    .max();
                match last_activity {
                    Some(t) => now.duration_since(t) > prune_after,
                    None => true,
                }
            })
            .map(|(addr, _)| *addr)
            .collect();

        for addr in stale {
            if let Some(state) = self.addresses.remove(&addr) {
                if let Some(node_id) = state.node_id {
                    self.node_id_forward.remove(&node_id);
                    self.node_tokens.remove(&node_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> (Ipv4Addr, u16) {
        (Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn unknown_with_no_information() {
        let pm = PeerManager::new(&Config::default());
        assert_eq!(pm.peer_is_good(addr(1)), Liveness::Unknown);
    }

    #[test]
    fn good_when_recently_replied() {
        let mut pm = PeerManager::new(&Config::default());
        pm.record_replied(addr(1));
        assert_eq!(pm.peer_is_good(addr(1)), Liveness::Good);
    }

    #[test]
    fn bad_after_two_failures_within_window() {
        let mut pm = PeerManager::new(&Config::default());
        pm.record_failure(addr(1));
        pm.record_failure(addr(1));
        assert_eq!(pm.peer_is_good(addr(1)), Liveness::Bad);
    }

    #[test]
    fn bind_node_id_evicts_conflicting_address() {
        let mut pm = PeerManager::new(&Config::default());
        let id = NodeId::generate();
        pm.bind_node_id(id, addr(1));
        pm.bind_node_id(id, addr(2));
        assert!(pm.addresses.get(&addr(1)).is_none());
        assert_eq!(pm.node_id_forward.get(&id).copied(), Some(addr(2)));
    }

    #[test]
    fn cached_token_expires_after_ttl() {
        let mut cfg = Config::default();
        cfg.token_secret_refresh_interval = Duration::from_millis(0);
        let mut pm = PeerManager::new(&cfg);
        let id = NodeId::generate();
        pm.cache_token(id, [1u8; crate::config::TOKEN_LEN]);
        assert!(pm.cached_token(&id).is_none());
    }

    #[test]
    fn prune_drops_addresses_with_no_recent_activity() {
        let mut pm = PeerManager::new(&Config::default());
        pm.record_sent(addr(1));
        pm.prune(Duration::from_millis(0));
        assert_eq!(pm.peer_is_good(addr(1)), Liveness::Unknown);
        assert!(pm.addresses.get(&addr(1)).is_none());
    }
}
