//! Typed request/response/error frames and their bencode dictionary shape
//! (spec.md §4.2, §6). A tagged enum of request variants replaces the
//! original method-name string dispatch (spec.md §9 REDESIGN FLAGS), while
//! the wire shape underneath stays a bencoded dictionary.

use crate::config::{ID_BYTE_LEN, RPC_ID_LEN, TOKEN_LEN};
use crate::contact::PeerContact;
use crate::error::CodecError;
use crate::id::NodeId;
use serde_bencode::value::Value;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub type RpcId = [u8; RPC_ID_LEN];

/// `(node_id, ip, udp_port)` triple returned by `findNode`/`findValue`
/// (spec.md §6). Unlike the compact peer records used for blob hosts, this
/// triple carries the address as a dotted-decimal string, matching the
/// wire table in spec.md §4.2/§6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTriple {
    pub node_id: NodeId,
    pub ip: Ipv4Addr,
    pub udp_port: u16,
}

impl NodeTriple {
    pub fn from_contact(contact: &PeerContact) -> Option<Self> {
        Some(NodeTriple {
            node_id: contact.node_id()?,
            ip: contact.address(),
            udp_port: contact.udp_port(),
        })
    }
}

/// Arguments of a `store` request, after translating the legacy
/// dict-argument shape (protocol_version == 0) into the canonical form
/// (SPEC_FULL.md, spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreArgs {
    pub blob_hash: NodeId,
    pub token: [u8; TOKEN_LEN],
    pub tcp_port: u16,
}

/// A dispatchable RPC method call (spec.md §4.6, §9 REDESIGN FLAGS: a
/// closed enum in place of string method dispatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodCall {
    Ping,
    Store(StoreArgs),
    FindNode { target: NodeId },
    FindValue { blob_id: NodeId, page: u32 },
}

impl MethodCall {
    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::Ping => "ping",
            MethodCall::Store(_) => "store",
            MethodCall::FindNode { .. } => "findNode",
            MethodCall::FindValue { .. } => "findValue",
        }
    }
}

/// The method-specific result of a successful call (spec.md §4.6, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodResult {
    Pong,
    Ok,
    Nodes(Vec<NodeTriple>),
    Value {
        token: [u8; TOKEN_LEN],
        contacts: Option<Vec<NodeTriple>>,
        /// The blob being queried; also the dict key `blob_peers` is
        /// encoded under on the wire (spec.md §6).
        blob_id: NodeId,
        /// Compact 54-byte peer records advertising `blob_id`, if present
        /// in the queried node's blob store.
        blob_peers: Option<Vec<[u8; 54]>>,
        total_pages: u32,
    },
}

/// The full envelope shared by all three message kinds (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request {
        rpc_id: RpcId,
        node_id: NodeId,
        call: MethodCall,
    },
    Response {
        rpc_id: RpcId,
        node_id: NodeId,
        result: MethodResult,
    },
    Error {
        rpc_id: RpcId,
        node_id: NodeId,
        exception_type: String,
        message: String,
    },
}

impl Frame {
    pub fn rpc_id(&self) -> &RpcId {
        match self {
            Frame::Request { rpc_id, .. }
            | Frame::Response { rpc_id, .. }
            | Frame::Error { rpc_id, .. } => rpc_id,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        match self {
            Frame::Request { node_id, .. }
            | Frame::Response { node_id, .. }
            | Frame::Error { node_id, .. } => node_id,
        }
    }
}

// --- bencode value conversions -------------------------------------------------

fn bytes_val(b: impl Into<Vec<u8>>) -> Value {
    Value::Bytes(b.into())
}

fn get<'a>(dict: &'a BTreeMap<Vec<u8>, Value>, key: &str) -> Option<&'a Value> {
    dict.get(key.as_bytes())
}

fn as_bytes<'a>(v: &'a Value, what: &str) -> Result<&'a [u8], CodecError> {
    match v {
        Value::Bytes(b) => Ok(b),
        _ => Err(CodecError::Malformed(format!("{what}: expected byte string"))),
    }
}

fn as_int(v: &Value, what: &str) -> Result<i64, CodecError> {
    match v {
        Value::Int(i) => Ok(*i),
        _ => Err(CodecError::Malformed(format!("{what}: expected integer"))),
    }
}

fn as_list<'a>(v: &'a Value, what: &str) -> Result<&'a [Value], CodecError> {
    match v {
        Value::List(l) => Ok(l),
        _ => Err(CodecError::Malformed(format!("{what}: expected list"))),
    }
}

fn as_dict<'a>(v: &'a Value, what: &str) -> Result<&'a BTreeMap<Vec<u8>, Value>, CodecError> {
    match v {
        Value::Dict(d) => Ok(d),
        _ => Err(CodecError::Malformed(format!("{what}: expected dict"))),
    }
}

fn fixed_bytes<const N: usize>(v: &Value, what: &str) -> Result<[u8; N], CodecError> {
    let b = as_bytes(v, what)?;
    if b.len() != N {
        return Err(CodecError::Malformed(format!(
            "{what}: expected {N} bytes, got {}",
            b.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(b);
    Ok(out)
}

fn node_id_from(v: &Value, what: &str) -> Result<NodeId, CodecError> {
    Ok(NodeId::from_bytes(fixed_bytes::<ID_BYTE_LEN>(v, what)?))
}

fn u16_from(v: &Value, what: &str) -> Result<u16, CodecError> {
    let i = as_int(v, what)?;
    u16::try_from(i).map_err(|_| CodecError::Malformed(format!("{what}: port out of u16 range")))
}

fn node_triple_to_value(t: &NodeTriple) -> Value {
    Value::List(vec![
        bytes_val(t.node_id.as_bytes().to_vec()),
        bytes_val(t.ip.to_string().into_bytes()),
        Value::Int(t.udp_port as i64),
    ])
}

fn node_triple_from_value(v: &Value) -> Result<NodeTriple, CodecError> {
    let list = as_list(v, "node triple")?;
    if list.len() != 3 {
        return Err(CodecError::Malformed("node triple: expected 3 elements".into()));
    }
    let node_id = node_id_from(&list[0], "node triple node_id")?;
    let ip_bytes = as_bytes(&list[1], "node triple ip")?;
    let ip_str = std::str::from_utf8(ip_bytes)
        .map_err(|_| CodecError::Malformed("node triple ip: not utf8".into()))?;
    let ip: Ipv4Addr = ip_str
        .parse()
        .map_err(|_| CodecError::Malformed(format!("node triple ip: invalid ipv4 {ip_str:?}")))?;
    let udp_port = u16_from(&list[2], "node triple udp_port")?;
    Ok(NodeTriple { node_id, ip, udp_port })
}

fn nodes_to_value(nodes: &[NodeTriple]) -> Value {
    Value::List(nodes.iter().map(node_triple_to_value).collect())
}

fn nodes_from_value(v: &Value) -> Result<Vec<NodeTriple>, CodecError> {
    as_list(v, "nodes")?
        .iter()
        .map(node_triple_from_value)
        .collect()
}

/// Encodes a [`Frame`] to its bencode [`Value`] tree.
pub fn frame_to_value(frame: &Frame) -> Value {
    let mut dict = BTreeMap::new();
    match frame {
        Frame::Request { rpc_id, node_id, call } => {
            dict.insert(b"y".to_vec(), Value::Int(0));
            dict.insert(b"t".to_vec(), bytes_val(rpc_id.to_vec()));
            dict.insert(b"id".to_vec(), bytes_val(node_id.as_bytes().to_vec()));
            dict.insert(b"q".to_vec(), bytes_val(call.name().as_bytes().to_vec()));
            let args = match call {
                MethodCall::Ping => Value::List(vec![]),
                MethodCall::Store(StoreArgs { blob_hash, token, tcp_port }) => Value::List(vec![
                    bytes_val(blob_hash.as_bytes().to_vec()),
                    bytes_val(token.to_vec()),
                    Value::Int(*tcp_port as i64),
                ]),
                MethodCall::FindNode { target } => {
                    Value::List(vec![bytes_val(target.as_bytes().to_vec())])
                }
                MethodCall::FindValue { blob_id, page } => {
                    let mut opts = BTreeMap::new();
                    opts.insert(b"page".to_vec(), Value::Int(*page as i64));
                    Value::List(vec![bytes_val(blob_id.as_bytes().to_vec()), Value::Dict(opts)])
                }
            };
            dict.insert(b"a".to_vec(), args);
        }
        Frame::Response { rpc_id, node_id, result } => {
            dict.insert(b"y".to_vec(), Value::Int(1));
            dict.insert(b"t".to_vec(), bytes_val(rpc_id.to_vec()));
            dict.insert(b"id".to_vec(), bytes_val(node_id.as_bytes().to_vec()));
            let mut r = BTreeMap::new();
            match result {
                MethodResult::Pong => {
                    r.insert(b"result".to_vec(), bytes_val(b"pong".to_vec()));
                }
                MethodResult::Ok => {
                    r.insert(b"result".to_vec(), bytes_val(b"OK".to_vec()));
                }
                MethodResult::Nodes(nodes) => {
                    r.insert(b"nodes".to_vec(), nodes_to_value(nodes));
                }
                MethodResult::Value { token, contacts, blob_id, blob_peers, total_pages } => {
                    r.insert(b"token".to_vec(), bytes_val(token.to_vec()));
                    r.insert(b"p".to_vec(), Value::Int(*total_pages as i64));
                    if let Some(contacts) = contacts {
                        r.insert(b"contacts".to_vec(), nodes_to_value(contacts));
                    }
                    if let Some(peers) = blob_peers {
                        let list = Value::List(
                            peers.iter().map(|p| bytes_val(p.to_vec())).collect(),
                        );
                        r.insert(blob_id.as_bytes().to_vec(), list);
                    }
                }
            }
            dict.insert(b"r".to_vec(), Value::Dict(r));
        }
        Frame::Error { rpc_id, node_id, exception_type, message } => {
            dict.insert(b"y".to_vec(), Value::Int(2));
            dict.insert(b"t".to_vec(), bytes_val(rpc_id.to_vec()));
            dict.insert(b"id".to_vec(), bytes_val(node_id.as_bytes().to_vec()));
            let mut e = BTreeMap::new();
            e.insert(b"exception_type".to_vec(), bytes_val(exception_type.clone().into_bytes()));
            e.insert(b"message".to_vec(), bytes_val(message.clone().into_bytes()));
            dict.insert(b"e".to_vec(), Value::Dict(e));
        }
    }
    Value::Dict(dict)
}

/// Decodes a bencode [`Value`] tree into a [`Frame`].
pub fn frame_from_value(value: &Value) -> Result<Frame, CodecError> {
    let dict = as_dict(value, "frame")?;
    let type_tag = as_int(get(dict, "y").ok_or_else(|| missing("y"))?, "y")?;
    let rpc_id = fixed_bytes::<RPC_ID_LEN>(get(dict, "t").ok_or_else(|| missing("t"))?, "t")?;
    let node_id = node_id_from(get(dict, "id").ok_or_else(|| missing("id"))?, "id")?;

    match type_tag {
        0 => {
            let method = as_bytes(get(dict, "q").ok_or_else(|| missing("q"))?, "q")?;
            let method = std::str::from_utf8(method)
                .map_err(|_| CodecError::Malformed("q: not utf8".into()))?;
            let args = get(dict, "a").ok_or_else(|| missing("a"))?;
            let call = decode_call(method, args)?;
            Ok(Frame::Request { rpc_id, node_id, call })
        }
        1 => {
            let r = get(dict, "r").ok_or_else(|| missing("r"))?;
            let r = as_dict(r, "r")?;
            let result = decode_result(r)?;
            Ok(Frame::Response { rpc_id, node_id, result })
        }
        2 => {
            let e = get(dict, "e").ok_or_else(|| missing("e"))?;
            let e = as_dict(e, "e")?;
            let exception_type = std::str::from_utf8(as_bytes(
                get(e, "exception_type").ok_or_else(|| missing("e.exception_type"))?,
                "e.exception_type",
            )?)
            .map_err(|_| CodecError::Malformed("e.exception_type: not utf8".into()))?
            .to_owned();
            let message = std::str::from_utf8(as_bytes(
                get(e, "message").ok_or_else(|| missing("e.message"))?,
                "e.message",
            )?)
            .map_err(|_| CodecError::Malformed("e.message: not utf8".into()))?
            .to_owned();
            Ok(Frame::Error { rpc_id, node_id, exception_type, message })
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

fn missing(field: &str) -> CodecError {
    CodecError::Malformed(format!("missing field {field:?}"))
}

/// Parses request `args` given the bencoded `q` method name, translating the
/// legacy single-dict `store` argument shape (protocol_version == 0) into
/// the canonical [`StoreArgs`] (SPEC_FULL.md, spec.md §6).
fn decode_call(method: &str, args: &Value) -> Result<MethodCall, CodecError> {
    match method {
        "ping" => Ok(MethodCall::Ping),
        "store" => Ok(MethodCall::Store(decode_store_args(args)?)),
        "findNode" => {
            let list = as_list(args, "findNode args")?;
            let target = list
                .first()
                .ok_or_else(|| CodecError::Malformed("findNode: missing target".into()))?;
            Ok(MethodCall::FindNode { target: node_id_from(target, "findNode target")? })
        }
        "findValue" => {
            let list = as_list(args, "findValue args")?;
            let blob_id = list
                .first()
                .ok_or_else(|| CodecError::Malformed("findValue: missing blob_id".into()))?;
            let blob_id = node_id_from(blob_id, "findValue blob_id")?;
            let page = match list.get(1) {
                Some(Value::Dict(d)) => match get(d, "page") {
                    Some(v) => as_int(v, "findValue page")? as u32,
                    None => 0,
                },
                _ => 0,
            };
            Ok(MethodCall::FindValue { blob_id, page })
        }
        other => Err(CodecError::UnknownMethod(other.to_owned())),
    }
}

/// Accepts either the canonical positional list `[blob_hash, token, tcp_port]`
/// or the legacy `protocol_version == 0` dict `{blob_hash, token, port}`.
pub fn decode_store_args(args: &Value) -> Result<StoreArgs, CodecError> {
    match args {
        Value::List(list) => {
            let blob_hash = list
                .first()
                .ok_or_else(|| CodecError::Malformed("store: missing blob_hash".into()))?;
            let blob_hash = node_id_from(blob_hash, "store blob_hash")?;
            let token = list
                .get(1)
                .ok_or_else(|| CodecError::Malformed("store: missing token".into()))?;
            let token = fixed_bytes::<TOKEN_LEN>(token, "store token")?;
            let tcp_port = list
                .get(2)
                .ok_or_else(|| CodecError::Malformed("store: missing tcp_port".into()))?;
            let tcp_port = u16_from(tcp_port, "store tcp_port")?;
            Ok(StoreArgs { blob_hash, token, tcp_port })
        }
        Value::Dict(d) => {
            let blob_hash = node_id_from(
                get(d, "blob_hash").ok_or_else(|| missing("a.blob_hash"))?,
                "store blob_hash",
            )?;
            let token = fixed_bytes::<TOKEN_LEN>(
                get(d, "token").ok_or_else(|| missing("a.token"))?,
                "store token",
            )?;
            let tcp_port = u16_from(get(d, "port").ok_or_else(|| missing("a.port"))?, "store port")?;
            Ok(StoreArgs { blob_hash, token, tcp_port })
        }
        _ => Err(CodecError::Malformed("store: args must be list or dict".into())),
    }
}

fn decode_result(r: &BTreeMap<Vec<u8>, Value>) -> Result<MethodResult, CodecError> {
    if let Some(v) = get(r, "result") {
        let tag = as_bytes(v, "result")?;
        return match tag {
            b"pong" => Ok(MethodResult::Pong),
            b"OK" => Ok(MethodResult::Ok),
            other => Err(CodecError::Malformed(format!(
                "unknown result tag {:?}",
                String::from_utf8_lossy(other)
            ))),
        };
    }
    if let Some(v) = get(r, "nodes") {
        return Ok(MethodResult::Nodes(nodes_from_value(v)?));
    }
    if let Some(token_val) = get(r, "token") {
        let token = fixed_bytes::<TOKEN_LEN>(token_val, "r.token")?;
        let total_pages = match get(r, "p") {
            Some(v) => as_int(v, "r.p")? as u32,
            None => 1,
        };
        let contacts = match get(r, "contacts") {
            Some(v) => Some(nodes_from_value(v)?),
            None => None,
        };
        // The blob-hosting peer list is keyed under the blob_id itself
        // (spec.md §6), not a fixed literal; a 48-byte key is unambiguous
        // next to the fixed "token"/"p"/"contacts" keys.
        let mut blob_id = NodeId::from_bytes([0u8; ID_BYTE_LEN]);
        let mut blob_peers = None;
        for (key, value) in r.iter() {
            if key.len() != ID_BYTE_LEN {
                continue;
            }
            let mut id_bytes = [0u8; ID_BYTE_LEN];
            id_bytes.copy_from_slice(key);
            blob_id = NodeId::from_bytes(id_bytes);
            let list = as_list(value, "r.<blob_id>")?;
            let mut out = Vec::with_capacity(list.len());
            for item in list {
                out.push(fixed_bytes::<54>(item, "r.<blob_id>[]")?);
            }
            blob_peers = Some(out);
            break;
        }
        return Ok(MethodResult::Value { token, contacts, blob_id, blob_peers, total_pages });
    }
    Err(CodecError::Malformed("result dict: unrecognized shape".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_request_round_trips() {
        let frame = Frame::Request {
            rpc_id: [7u8; RPC_ID_LEN],
            node_id: NodeId::generate(),
            call: MethodCall::Ping,
        };
        let value = frame_to_value(&frame);
        let decoded = frame_from_value(&value).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn find_value_request_round_trips_with_page() {
        let frame = Frame::Request {
            rpc_id: [4u8; RPC_ID_LEN],
            node_id: NodeId::generate(),
            call: MethodCall::FindValue { blob_id: NodeId::generate(), page: 3 },
        };
        let value = frame_to_value(&frame);
        let decoded = frame_from_value(&value).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn legacy_store_dict_args_translate_to_canonical() {
        let mut d = BTreeMap::new();
        d.insert(b"blob_hash".to_vec(), bytes_val(vec![9u8; ID_BYTE_LEN]));
        d.insert(b"token".to_vec(), bytes_val(vec![1u8; TOKEN_LEN]));
        d.insert(b"port".to_vec(), Value::Int(4444));
        let args = Value::Dict(d);
        let decoded = decode_store_args(&args).unwrap();
        assert_eq!(decoded.tcp_port, 4444);
        assert_eq!(decoded.blob_hash, NodeId::from_bytes([9u8; ID_BYTE_LEN]));
    }

    #[test]
    fn find_value_response_round_trips_with_peers() {
        let frame = Frame::Response {
            rpc_id: [1u8; RPC_ID_LEN],
            node_id: NodeId::generate(),
            result: MethodResult::Value {
                token: [2u8; TOKEN_LEN],
                contacts: Some(vec![NodeTriple {
                    node_id: NodeId::generate(),
                    ip: Ipv4Addr::new(127, 0, 0, 1),
                    udp_port: 4444,
                }]),
                blob_id: NodeId::generate(),
                blob_peers: Some(vec![[3u8; 54]]),
                total_pages: 1,
            },
        };
        let value = frame_to_value(&frame);
        let decoded = frame_from_value(&value).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn error_frame_round_trips() {
        let frame = Frame::Error {
            rpc_id: [1u8; RPC_ID_LEN],
            node_id: NodeId::generate(),
            exception_type: "ValueError".into(),
            message: "bad token".into(),
        };
        let value = frame_to_value(&frame);
        let decoded = frame_from_value(&value).unwrap();
        assert_eq!(decoded, frame);
    }
}
