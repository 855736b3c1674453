//! Error types for the DHT core, layered the way `ant-networking` stacks
//! per-concern errors under one top-level enum.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors from constructing a [`crate::contact::PeerContact`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContactError {
    #[error("address is not a valid IPv4 address")]
    NotIpv4,
    #[error("udp port {0} is out of range (must be 1..=65535)")]
    InvalidUdpPort(u16),
    #[error("tcp port {0} is out of range (must be 1..=65535)")]
    InvalidTcpPort(u16),
}

/// Errors from encoding or decoding a wire datagram.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed datagram: {0}")]
    Malformed(String),
    #[error("datagram of {0} bytes exceeds the {1} byte size limit")]
    Oversized(usize, usize),
    #[error("unknown message type tag {0}")]
    UnknownType(i64),
    #[error("unknown or unsupported method {0:?}")]
    UnknownMethod(String),
}

/// The outward-facing result of an outbound `send_request` call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("remote returned an exception: {exception_type}: {message}")]
    RemoteException {
        exception_type: String,
        message: String,
    },
    #[error("request timed out")]
    Timeout,
    #[error("request was cancelled")]
    Cancelled,
    #[error("transport is not connected")]
    TransportNotConnected,
    #[error("datagram of {0} bytes exceeds the size limit, refusing to send")]
    Oversized(usize),
    #[error("response arrived from unexpected address {actual} (expected {expected})")]
    UnexpectedSource {
        expected: SocketAddr,
        actual: SocketAddr,
    },
    #[error("peer responded with its own node id equal to ours (self-loop)")]
    SelfLoop,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a request handler can raise; translated into an error datagram by
/// the caller (spec.md §4.6, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Top-level error type for the public [`crate::node::Node`] API.
#[derive(Debug, Error)]
pub enum DhtError {
    #[error(transparent)]
    Contact(#[from] ContactError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
