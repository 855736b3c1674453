//! A single k-bucket: up to `K` peers sharing a common distance range from
//! the local node, plus a replacement set (spec.md §3, §4.3).

use crate::config::K;
use crate::contact::PeerContact;
use std::time::Instant;

/// An ordered list of at most [`K`] peers. Insertion order doubles as
/// recency order: the head (index 0) is the least-recently-seen entry and
/// the first eviction candidate (spec.md §3).
#[derive(Debug)]
pub struct KBucket {
    pub(super) peers: Vec<PeerContact>,
    /// Recent peers learned while the bucket was full, kept in case a
    /// member is later evicted (spec.md §3).
    pub(super) replacements: Vec<PeerContact>,
    pub(super) last_changed: Instant,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            peers: Vec::with_capacity(K),
            replacements: Vec::new(),
            last_changed: Instant::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= K
    }

    pub fn peers(&self) -> &[PeerContact] {
        &self.peers
    }

    pub fn last_changed(&self) -> Instant {
        self.last_changed
    }

    fn touch(&mut self) {
        self.last_changed = Instant::now();
    }

    pub(super) fn position_by_node_id(&self, id: &crate::id::NodeId) -> Option<usize> {
        self.peers.iter().position(|p| p.node_id() == Some(*id))
    }

    pub(super) fn position_by_address(&self, key: (std::net::Ipv4Addr, u16)) -> Option<usize> {
        self.peers.iter().position(|p| p.address_key() == key)
    }

    pub(super) fn push(&mut self, peer: PeerContact) {
        self.peers.push(peer);
        self.touch();
    }

    pub(super) fn remove_at(&mut self, index: usize) -> PeerContact {
        self.touch();
        self.peers.remove(index)
    }

    pub(super) fn replace_at(&mut self, index: usize, peer: PeerContact) {
        self.peers[index] = peer;
        self.touch();
    }

    pub(super) fn push_replacement(&mut self, peer: PeerContact) {
        const MAX_REPLACEMENTS: usize = K;
        if self.replacements.iter().any(|p| p.address_key() == peer.address_key()) {
            return;
        }
        self.replacements.push(peer);
        if self.replacements.len() > MAX_REPLACEMENTS {
            self.replacements.remove(0);
        }
    }
}

impl Default for KBucket {
    fn default() -> Self {
        KBucket::new()
    }
}
