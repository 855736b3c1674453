//! Peer contact information (spec.md §3).

use crate::error::ContactError;
use crate::id::NodeId;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A remote peer's address and protocol metadata. Construction validates
/// the address and port ranges; an invalid contact simply cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerContact {
    /// Absent when the contact was learned only by address, e.g. an
    /// incoming datagram from a sender we have not yet identified.
    node_id: Option<NodeId>,
    address: Ipv4Addr,
    udp_port: u16,
    tcp_port: Option<u16>,
    protocol_version: u16,
}

impl PeerContact {
    pub fn new(
        node_id: Option<NodeId>,
        address: Ipv4Addr,
        udp_port: u16,
        tcp_port: Option<u16>,
        protocol_version: u16,
    ) -> Result<Self, ContactError> {
        if udp_port == 0 {
            return Err(ContactError::InvalidUdpPort(udp_port));
        }
        if let Some(p) = tcp_port {
            if p == 0 {
                return Err(ContactError::InvalidTcpPort(p));
            }
        }
        Ok(PeerContact {
            node_id,
            address,
            udp_port,
            tcp_port,
            protocol_version,
        })
    }

    /// Builds a contact from a socket address, without a known node id yet.
    pub fn from_socket_addr(addr: SocketAddr, protocol_version: u16) -> Result<Self, ContactError> {
        match addr {
            SocketAddr::V4(v4) => PeerContact::new(None, *v4.ip(), v4.port(), None, protocol_version),
            SocketAddr::V6(_) => Err(ContactError::NotIpv4),
        }
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_tcp_port(mut self, tcp_port: u16) -> Result<Self, ContactError> {
        if tcp_port == 0 {
            return Err(ContactError::InvalidTcpPort(tcp_port));
        }
        self.tcp_port = Some(tcp_port);
        Ok(self)
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn tcp_port(&self) -> Option<u16> {
        self.tcp_port
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn udp_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.udp_port))
    }

    pub fn tcp_socket_addr(&self) -> Option<SocketAddr> {
        self.tcp_port
            .map(|p| SocketAddr::V4(SocketAddrV4::new(self.address, p)))
    }

    /// `(ip, udp_port)` identity used as the peer manager's address key.
    pub fn address_key(&self) -> (Ipv4Addr, u16) {
        (self.address, self.udp_port)
    }

    /// 6-byte compact IPv4 + port encoding used in `findNode`/`findValue`
    /// responses (spec.md §6, GLOSSARY "Compact address").
    pub fn compact_udp(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[..4].copy_from_slice(&self.address.octets());
        out[4..].copy_from_slice(&self.udp_port.to_be_bytes());
        out
    }

    /// 6-byte compact IPv4 + TCP port encoding, used to advertise blob
    /// hosting. Returns `None` if no TCP port is known.
    pub fn compact_tcp(&self) -> Option<[u8; 6]> {
        let tcp_port = self.tcp_port?;
        let mut out = [0u8; 6];
        out[..4].copy_from_slice(&self.address.octets());
        out[4..].copy_from_slice(&tcp_port.to_be_bytes());
        Some(out)
    }

    /// 54-byte compact peer record used in `findValue` responses: 6-byte
    /// compact TCP address followed by the 48-byte node id.
    pub fn compact_tcp_record(&self) -> Option<[u8; 54]> {
        let tcp = self.compact_tcp()?;
        let node_id = self.node_id?;
        let mut out = [0u8; 54];
        out[..6].copy_from_slice(&tcp);
        out[6..].copy_from_slice(node_id.as_bytes());
        Some(out)
    }
}
