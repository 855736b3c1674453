//! Deferred, rate-limited liveness probing of recently-seen candidates
//! (spec.md §4.7).

use crate::contact::PeerContact;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct QueueEntry {
    peer: PeerContact,
    due_at: Instant,
}

/// A work list of `peer -> due_at`. A single worker drains it at most once
/// per second, per [`PingQueue::pop_due`] (spec.md §4.7).
pub struct PingQueue {
    entries: VecDeque<QueueEntry>,
    default_delay: Duration,
}

impl PingQueue {
    pub fn new(default_delay: Duration) -> Self {
        PingQueue { entries: VecDeque::new(), default_delay }
    }

    /// Inserts `peer`, or advances its due time if already queued
    /// (spec.md §4.7 `enqueue_maybe_ping`).
    pub fn enqueue_maybe_ping(&mut self, peer: PeerContact) {
        self.enqueue_with_delay(peer, self.default_delay);
    }

    /// Never pushes an already-queued peer's probe later than scheduled —
    /// only an earlier due time replaces it — so repeated traffic from a
    /// peer can't starve its liveness probe indefinitely (spec.md §4.7;
    /// `examples/original_source/lbry/lbry/dht/protocol/protocol.py`'s
    /// `PingQueue.enqueue_maybe_ping`).
    pub fn enqueue_with_delay(&mut self, peer: PeerContact, delay: Duration) {
        let due_at = Instant::now() + delay;
        if let Some(existing) = self.entries.iter_mut().find(|e| e.peer.address_key() == peer.address_key()) {
            if due_at < existing.due_at {
                existing.due_at = due_at;
            }
            existing.peer = peer;
            return;
        }
        self.entries.push_back(QueueEntry { peer, due_at });
    }

    /// Removes and returns the earliest-due peer whose due time has
    /// already passed, if any. Call once per second from the ping worker
    /// (spec.md §4.7).
    pub fn pop_due(&mut self) -> Option<PeerContact> {
        let now = Instant::now();
        let position = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due_at <= now)
            .min_by_key(|(_, e)| e.due_at)
            .map(|(i, _)| i)?;
        self.entries.remove(position).map(|e| e.peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
