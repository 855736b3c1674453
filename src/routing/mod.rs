//! Routing table: binary trie of k-buckets, split-on-demand (spec.md §4.3).

pub mod bucket;
pub mod table;

pub use bucket::KBucket;
pub use table::{add_peer, InsertOutcome, RoutingTable};
