//! Bencode serialization of [`Frame`] datagrams, with the `MSG_SIZE_LIMIT`
//! enforced on both directions (spec.md §4.2).

use super::messages::{frame_from_value, frame_to_value, Frame};
use crate::config::MSG_SIZE_LIMIT;
use crate::error::CodecError;
use serde_bencode::value::Value;

/// Serializes a [`Frame`] to its wire bytes. Fails if the encoded datagram
/// would exceed [`MSG_SIZE_LIMIT`] — callers should not attempt to send it
/// (spec.md §4.2, §7).
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let value = frame_to_value(frame);
    let bytes = serde_bencode::to_bytes(&value)
        .map_err(|e| CodecError::Malformed(format!("bencode encode failed: {e}")))?;
    if bytes.len() > MSG_SIZE_LIMIT {
        return Err(CodecError::Oversized(bytes.len(), MSG_SIZE_LIMIT));
    }
    Ok(bytes)
}

/// Parses wire bytes into a [`Frame`]. Rejects datagrams already over
/// [`MSG_SIZE_LIMIT`] before attempting to parse them.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() > MSG_SIZE_LIMIT {
        return Err(CodecError::Oversized(bytes.len(), MSG_SIZE_LIMIT));
    }
    let value: Value = serde_bencode::from_bytes(bytes)
        .map_err(|e| CodecError::Malformed(format!("bencode decode failed: {e}")))?;
    frame_from_value(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RPC_ID_LEN;
    use crate::id::NodeId;
    use crate::wire::messages::MethodCall;

    #[test]
    fn encode_then_decode_preserves_ping_request() {
        let frame = Frame::Request {
            rpc_id: [4u8; RPC_ID_LEN],
            node_id: NodeId::generate(),
            call: MethodCall::Ping,
        };
        let bytes = encode(&frame).unwrap();
        assert!(bytes.len() <= MSG_SIZE_LIMIT);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_rejects_oversized_datagram() {
        let huge = vec![b'0'; MSG_SIZE_LIMIT + 1];
        let err = decode(&huge).unwrap_err();
        assert!(matches!(err, CodecError::Oversized(_, _)));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(b"not bencode at all {{{").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
