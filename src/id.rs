//! 384-bit identifiers shared by peers and blobs, and the XOR distance metric.

use rand::RngCore;
use std::fmt;

/// Number of bytes in a [`NodeId`] (384 bits).
pub const ID_LEN: usize = 48;

/// An opaque 384-bit identifier. Used both for peer node IDs and blob hashes,
/// which live in the same address space so the same routing algorithm
/// applies to both.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    pub const ZERO: NodeId = NodeId([0u8; ID_LEN]);

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Generates a cryptographically random node ID.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// A random ID sharing the given number of leading bits with `self`.
    /// Used to generate refresh targets for a bucket range.
    pub fn rand_with_common_prefix(&self, common_bits: u16) -> NodeId {
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let full_bytes = (common_bits / 8) as usize;
        bytes[..full_bytes].copy_from_slice(&self.0[..full_bytes]);
        if full_bytes < ID_LEN {
            let remaining_bits = common_bits % 8;
            if remaining_bits > 0 {
                let mask = 0xFFu8 << (8 - remaining_bits);
                bytes[full_bytes] = (self.0[full_bytes] & mask) | (bytes[full_bytes] & !mask);
            } else {
                // Flip the first diverging bit so the prefix is exactly `common_bits`,
                // not accidentally longer.
                bytes[full_bytes] ^= 0x80;
            }
        }
        NodeId(bytes)
    }

    /// XOR distance to another ID, as a big-endian 384-bit unsigned value.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Number of leading bits shared between `self` and `other`.
    pub fn common_prefix_bits(&self, other: &NodeId) -> u16 {
        let mut bits = 0u16;
        for i in 0..ID_LEN {
            let x = self.0[i] ^ other.0[i];
            if x == 0 {
                bits += 8;
                continue;
            }
            bits += x.leading_zeros() as u16;
            break;
        }
        bits
    }

    /// Returns the bit at `index` (0 = most significant bit of byte 0).
    pub fn bit(&self, index: u16) -> bool {
        let byte = (index / 8) as usize;
        let shift = 7 - (index % 8);
        (self.0[byte] >> shift) & 1 == 1
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// XOR distance between two [`NodeId`]s, compared as an unsigned 384-bit
/// integer (big-endian byte order, same as the IDs themselves).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_LEN]);

impl Distance {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// True iff `a` is closer to `target` than `b` is, under the XOR metric.
pub fn closer(target: &NodeId, a: &NodeId, b: &NodeId) -> bool {
    target.distance(a) < target.distance(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_for_self() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_eq!(a.distance(&b), b.distance(&a));
        assert!(a.distance(&a).is_zero());
    }

    #[test]
    fn closer_orders_by_xor_distance() {
        let target = NodeId::from_bytes([0u8; ID_LEN]);
        let mut near = [0u8; ID_LEN];
        near[ID_LEN - 1] = 1;
        let mut far = [0u8; ID_LEN];
        far[0] = 0x80;
        let near = NodeId::from_bytes(near);
        let far = NodeId::from_bytes(far);
        assert!(closer(&target, &near, &far));
        assert!(!closer(&target, &far, &near));
    }

    #[test]
    fn common_prefix_bits_full_match() {
        let a = NodeId::generate();
        assert_eq!(a.common_prefix_bits(&a), (ID_LEN * 8) as u16);
    }

    #[test]
    fn common_prefix_bits_first_bit_differs() {
        let a = NodeId::from_bytes([0u8; ID_LEN]);
        let mut other = [0u8; ID_LEN];
        other[0] = 0x80;
        let b = NodeId::from_bytes(other);
        assert_eq!(a.common_prefix_bits(&b), 0);
    }

    #[test]
    fn rand_with_common_prefix_matches_request() {
        let a = NodeId::generate();
        for bits in [0u16, 1, 7, 8, 9, 63, 128, 383] {
            let r = a.rand_with_common_prefix(bits);
            assert!(r.common_prefix_bits(&a) >= bits, "bits={bits}");
        }
    }

    #[test]
    fn bit_accessor_matches_common_prefix() {
        let mut bytes = [0u8; ID_LEN];
        bytes[0] = 0b1010_0000;
        let id = NodeId::from_bytes(bytes);
        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(2));
        assert!(!id.bit(3));
    }
}
