//! CBOR (binary) and JSON (text) encode/decode for [`Envelope`], plus the
//! length-prefixed framing used when messages are carried over a stream
//! transport (teacher precedent: `lib-protocols::wire`'s
//! `read_framed_message`/`write_framed_message`).

use boson_crypto::Id;

use crate::error::{DhtError, ErrorCode};
use crate::message::{
    Body, Envelope, MessageKind, Method, Query, Response, WireArgs, WireEnvelope, WireErrorBody,
};

/// Matches the teacher's `MAX_MESSAGE_SIZE` (16 MB), generous for a DHT
/// datagram but still a hard backstop against a corrupt length prefix.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

fn y_byte(kind: MessageKind, method: Option<Method>) -> u8 {
    let method_bits = method.map(|m| m as u8).unwrap_or(0);
    kind as u8 | method_bits
}

fn split_y(y: u8) -> (MessageKind, Option<Method>) {
    let kind = match y & 0x60 {
        0x00 => MessageKind::Error,
        0x20 => MessageKind::Request,
        0x40 => MessageKind::Response,
        _ => MessageKind::Error,
    };
    let method = Method::from_u8(y & 0x1f);
    (kind, method)
}

fn query_to_args(query: &Query) -> WireArgs {
    let mut args = WireArgs::default();
    match query {
        Query::Ping => {}
        Query::FindNode { target, want } => {
            args.target = Some(*target);
            args.want = Some(*want);
        }
        Query::FindPeer { target, want } => {
            args.target = Some(*target);
            args.want = Some(*want);
        }
        Query::AnnouncePeer {
            target,
            peer,
            peer_id,
            token,
            persistent,
        } => {
            args.target = Some(*target);
            args.peer = Some(peer.clone());
            args.peer_id = *peer_id;
            args.token = Some(*token);
            args.persistent = Some(*persistent);
        }
        Query::StoreValue {
            value,
            expected_sequence,
            token,
            persistent,
        } => {
            args.value = Some(value.clone());
            args.expected_sequence = *expected_sequence;
            args.token = Some(*token);
            args.persistent = Some(*persistent);
        }
        Query::FindValue { target, cas, want } => {
            args.target = Some(*target);
            args.cas = Some(*cas);
            args.want = Some(*want);
        }
    }
    args
}

fn args_to_query(method: Method, args: WireArgs) -> Result<Query, DhtError> {
    Ok(match method {
        Method::Ping => Query::Ping,
        Method::FindNode => Query::FindNode {
            target: require(args.target, "target")?,
            want: args.want.unwrap_or(0),
        },
        Method::FindPeer => Query::FindPeer {
            target: require(args.target, "target")?,
            want: args.want.unwrap_or(0),
        },
        Method::AnnouncePeer => Query::AnnouncePeer {
            target: require(args.target, "target")?,
            peer: require(args.peer, "peer")?,
            peer_id: args.peer_id,
            token: require(args.token, "token")?,
            persistent: args.persistent.unwrap_or(false),
        },
        Method::StoreValue => Query::StoreValue {
            value: require(args.value, "value")?,
            expected_sequence: args.expected_sequence,
            token: require(args.token, "token")?,
            persistent: args.persistent.unwrap_or(false),
        },
        Method::FindValue => Query::FindValue {
            target: require(args.target, "target")?,
            cas: args.cas.unwrap_or(-1),
            want: args.want.unwrap_or(0),
        },
    })
}

fn response_to_args(response: &Response) -> WireArgs {
    let mut args = WireArgs::default();
    match response {
        Response::Ping => {}
        Response::FindNode { nodes4, nodes6, token } => {
            args.nodes4 = nodes4.clone();
            args.nodes6 = nodes6.clone();
            args.token = *token;
        }
        Response::FindPeer {
            peers,
            nodes4,
            nodes6,
            token,
        } => {
            args.peers = peers.clone();
            args.nodes4 = nodes4.clone();
            args.nodes6 = nodes6.clone();
            args.token = *token;
        }
        Response::AnnouncePeer => {}
        Response::StoreValue => {}
        Response::FindValue {
            value,
            nodes4,
            nodes6,
            token,
        } => {
            args.value = value.clone();
            args.nodes4 = nodes4.clone();
            args.nodes6 = nodes6.clone();
            args.token = *token;
        }
    }
    args
}

fn args_to_response(method: Method, args: WireArgs) -> Result<Response, DhtError> {
    Ok(match method {
        Method::Ping => Response::Ping,
        Method::FindNode => Response::FindNode {
            nodes4: args.nodes4,
            nodes6: args.nodes6,
            token: args.token,
        },
        Method::FindPeer => Response::FindPeer {
            peers: args.peers,
            nodes4: args.nodes4,
            nodes6: args.nodes6,
            token: args.token,
        },
        Method::AnnouncePeer => Response::AnnouncePeer,
        Method::StoreValue => Response::StoreValue,
        Method::FindValue => Response::FindValue {
            value: args.value,
            nodes4: args.nodes4,
            nodes6: args.nodes6,
            token: args.token,
        },
    })
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, DhtError> {
    value.ok_or_else(|| DhtError::protocol(format!("missing required field `{field}`")))
}

pub(crate) fn to_wire(envelope: &Envelope) -> WireEnvelope {
    match &envelope.body {
        Body::Query(q) => WireEnvelope {
            y: y_byte(MessageKind::Request, Some(q.method())),
            t: envelope.txid,
            q: Some(query_to_args(q)),
            r: None,
            e: None,
            v: envelope.version,
            i: envelope.sender,
        },
        Body::Response(r) => WireEnvelope {
            y: y_byte(MessageKind::Response, Some(r.method())),
            t: envelope.txid,
            q: None,
            r: Some(response_to_args(r)),
            e: None,
            v: envelope.version,
            i: envelope.sender,
        },
        Body::Error { code, message } => WireEnvelope {
            y: y_byte(MessageKind::Error, None),
            t: envelope.txid,
            q: None,
            r: None,
            e: Some(WireErrorBody {
                c: (*code).into(),
                m: message.clone(),
            }),
            v: envelope.version,
            i: envelope.sender,
        },
    }
}

pub(crate) fn from_wire(wire: WireEnvelope) -> Result<Envelope, DhtError> {
    if wire.t == 0 {
        return Err(DhtError::protocol("transaction id must be non-zero"));
    }
    let (kind, method) = split_y(wire.y);
    let body = match kind {
        MessageKind::Request => {
            if wire.q.is_none() || wire.r.is_some() || wire.e.is_some() {
                return Err(DhtError::protocol("request envelope must carry only `q`"));
            }
            let method = method.ok_or_else(|| DhtError::method_unknown(wire.y & 0x1f))?;
            Body::Query(args_to_query(method, wire.q.unwrap())?)
        }
        MessageKind::Response => {
            if wire.r.is_none() || wire.q.is_some() || wire.e.is_some() {
                return Err(DhtError::protocol("response envelope must carry only `r`"));
            }
            let method = method.ok_or_else(|| DhtError::method_unknown(wire.y & 0x1f))?;
            Body::Response(args_to_response(method, wire.r.unwrap())?)
        }
        MessageKind::Error => {
            if wire.e.is_none() || wire.q.is_some() || wire.r.is_some() {
                return Err(DhtError::protocol("error envelope must carry only `e`"));
            }
            let e = wire.e.unwrap();
            let code = ErrorCode::try_from(e.c).unwrap_or(ErrorCode::Generic);
            Body::Error { code, message: e.m }
        }
    };
    Ok(Envelope {
        txid: wire.t,
        version: wire.v,
        sender: wire.i,
        body,
    })
}

pub fn encode_cbor(envelope: &Envelope) -> Result<Vec<u8>, DhtError> {
    let wire = to_wire(envelope);
    let mut out = Vec::new();
    ciborium::into_writer(&wire, &mut out).map_err(|e| DhtError::generic(e.to_string()))?;
    Ok(out)
}

pub fn decode_cbor(bytes: &[u8]) -> Result<Envelope, DhtError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(DhtError::message_too_big(bytes.len(), MAX_MESSAGE_SIZE));
    }
    let wire: WireEnvelope = ciborium::from_reader(bytes).map_err(|e| DhtError::protocol(e.to_string()))?;
    from_wire(wire)
}

pub fn encode_json(envelope: &Envelope) -> Result<String, DhtError> {
    let wire = to_wire(envelope);
    serde_json::to_string(&wire).map_err(|e| DhtError::generic(e.to_string()))
}

pub fn decode_json(text: &str) -> Result<Envelope, DhtError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(DhtError::message_too_big(text.len(), MAX_MESSAGE_SIZE));
    }
    let wire: WireEnvelope = serde_json::from_str(text).map_err(|e| DhtError::protocol(e.to_string()))?;
    from_wire(wire)
}

/// Prepend a 4-byte big-endian length to an encoded frame, for transports
/// that need explicit framing rather than relying on datagram boundaries.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, DhtError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(DhtError::message_too_big(payload.len(), MAX_MESSAGE_SIZE));
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a framed buffer into `(frame_payload, remainder)`, or `None` if the
/// buffer doesn't yet contain a full frame.
pub fn unframe(buf: &[u8]) -> Result<Option<(&[u8], &[u8])>, DhtError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(DhtError::message_too_big(len, MAX_MESSAGE_SIZE));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    Ok(Some((&buf[4..4 + len], &buf[4 + len..])))
}

/// Pull the peer-facing identity out of an `AnnouncePeer` query, honoring the
/// out-of-band `peerId` attribute when `peer.id` was omitted at encode time
/// (spec.md §4.2). Boson's [`Query::AnnouncePeer`] always carries a complete
/// `PeerInfo`, so this mainly documents and checks the invariant rather than
/// filling in a gap.
pub fn resolve_announced_peer_id(peer_id_field: Option<Id>, peer_id_in_record: Id) -> Id {
    peer_id_field.unwrap_or(peer_id_in_record)
}
