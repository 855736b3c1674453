//! `blob_id → set<PeerContact>` announcements with TTL-based expiry
//! (spec.md §3, §4.4).

use crate::contact::PeerContact;
use crate::id::NodeId;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

struct Advertisement {
    peer: PeerContact,
    inserted_at: Instant,
}

/// In-memory `blob_id → advertising peers` map. No persistence; entries
/// older than `data_expiration` are swept lazily on lookup or on a
/// periodic tick (spec.md §4.4).
#[derive(Default)]
pub struct BlobStore {
    entries: HashMap<NodeId, Vec<Advertisement>>,
    /// blob_ids the local node itself hosts, fed by the external blob
    /// subsystem; the DHT only ever reads this set (spec.md §3).
    completed_blobs: HashSet<NodeId>,
}

impl BlobStore {
    pub fn new() -> Self {
        BlobStore::default()
    }

    /// Inserts or refreshes `peer`'s advertisement for `blob_id`.
    pub fn add_peer_for_blob(&mut self, peer: PeerContact, blob_id: NodeId) {
        let now = Instant::now();
        let ads = self.entries.entry(blob_id).or_default();
        if let Some(existing) = ads.iter_mut().find(|a| same_peer(&a.peer, &peer)) {
            existing.peer = peer;
            existing.inserted_at = now;
            return;
        }
        ads.push(Advertisement { peer, inserted_at: now });
    }

    /// Live (non-expired) peers advertising `blob_id`.
    pub fn get_peers_for_blob(&mut self, blob_id: &NodeId, data_expiration: Duration) -> Vec<PeerContact> {
        self.sweep_one(blob_id, data_expiration);
        self.entries
            .get(blob_id)
            .map(|ads| ads.iter().map(|a| a.peer).collect())
            .unwrap_or_default()
    }

    fn sweep_one(&mut self, blob_id: &NodeId, data_expiration: Duration) {
        if let Some(ads) = self.entries.get_mut(blob_id) {
            ads.retain(|a| a.inserted_at.elapsed() <= data_expiration);
            if ads.is_empty() {
                self.entries.remove(blob_id);
            }
        }
    }

    /// Sweeps every blob's advertisement list, dropping entries older than
    /// `data_expiration`. May be run on a periodic tick instead of per-call.
    pub fn remove_expired(&mut self, data_expiration: Duration) {
        self.entries.retain(|_, ads| {
            ads.retain(|a| a.inserted_at.elapsed() <= data_expiration);
            !ads.is_empty()
        });
    }

    pub fn mark_completed(&mut self, blob_id: NodeId) {
        self.completed_blobs.insert(blob_id);
    }

    pub fn has_blob(&self, blob_id: &NodeId) -> bool {
        self.completed_blobs.contains(blob_id)
    }

    /// Total number of live advertising entries across all blobs (exposed
    /// for metrics; spec.md §4.4).
    pub fn size(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

fn same_peer(a: &PeerContact, b: &PeerContact) -> bool {
    a.address_key() == b.address_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn contact(port: u16) -> PeerContact {
        PeerContact::new(Some(NodeId::generate()), Ipv4Addr::LOCALHOST, port, Some(port), 1).unwrap()
    }

    #[test]
    fn repeated_insert_refreshes_single_entry() {
        let mut store = BlobStore::new();
        let blob = NodeId::generate();
        let peer = contact(1000);
        store.add_peer_for_blob(peer, blob);
        store.add_peer_for_blob(peer, blob);
        assert_eq!(store.get_peers_for_blob(&blob, Duration::from_secs(3600)).len(), 1);
    }

    #[test]
    fn expired_entries_are_omitted() {
        let mut store = BlobStore::new();
        let blob = NodeId::generate();
        store.add_peer_for_blob(contact(1000), blob);
        let peers = store.get_peers_for_blob(&blob, Duration::from_millis(0));
        assert!(peers.is_empty());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn size_counts_live_entries_across_blobs() {
        let mut store = BlobStore::new();
        store.add_peer_for_blob(contact(1000), NodeId::generate());
        store.add_peer_for_blob(contact(1001), NodeId::generate());
        assert_eq!(store.size(), 2);
    }
}
