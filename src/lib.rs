//! Kademlia-style DHT core for advertising and discovering peers that host
//! content-addressed blobs.
//!
//! A [`node::Node`] owns one UDP socket and serves `ping`/`store`/
//! `findNode`/`findValue` to keep its [`routing::RoutingTable`] populated,
//! accept blob announcements into its [`blob_store::BlobStore`], and drive
//! [`lookup`] convergence toward any target identifier.

pub mod blob_store;
pub mod config;
pub mod contact;
pub mod error;
pub mod id;
pub mod lookup;
pub mod node;
pub mod peer_manager;
pub mod ping_queue;
pub mod routing;
pub mod rpc;
pub mod token;
pub mod wire;

pub use config::Config;
pub use contact::PeerContact;
pub use error::DhtError;
pub use id::NodeId;
pub use node::Node;
