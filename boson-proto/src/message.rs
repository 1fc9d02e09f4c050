//! The v2 envelope (spec.md §4.2) — the sole wire format; the README marks it
//! authoritative over the deprecated v1 module (spec.md §9 Open Questions).

use boson_crypto::Id;
use serde::{Deserialize, Serialize};

use crate::error::{DhtError, ErrorCode};
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::value::Value;

/// Low 5 bits of `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    Ping = 1,
    FindNode = 2,
    FindPeer = 3,
    AnnouncePeer = 4,
    StoreValue = 5,
    FindValue = 6,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Method::Ping,
            2 => Method::FindNode,
            3 => Method::FindPeer,
            4 => Method::AnnouncePeer,
            5 => Method::StoreValue,
            6 => Method::FindValue,
            _ => return None,
        })
    }
}

/// High 3 bits of `y`, as the spec's literal byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Error = 0x00,
    Request = 0x20,
    Response = 0x40,
}

/// `want` bitmask carried by FIND_NODE/FIND_PEER/FIND_VALUE requests.
pub const WANT_IPV4: u8 = 1;
pub const WANT_IPV6: u8 = 2;
pub const WANT_TOKEN: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Ping,
    FindNode {
        target: Id,
        want: u8,
    },
    FindPeer {
        target: Id,
        want: u8,
    },
    AnnouncePeer {
        /// The service id this peer is announcing itself under (the same
        /// id a later `FindPeer { target }` would search for), distinct
        /// from `peer.id`, the announcing peer's own identity.
        target: Id,
        peer: PeerInfo,
        /// Required when `peer.id` is carried out-of-band (spec.md §4.2).
        peer_id: Option<Id>,
        token: u32,
        persistent: bool,
    },
    StoreValue {
        value: Value,
        /// CAS precondition; `None` means unconditional (spec.md §4.4).
        expected_sequence: Option<u64>,
        token: u32,
        persistent: bool,
    },
    FindValue {
        target: Id,
        /// Caller's already-known sequence number; the responder only
        /// attaches a value newer than this.
        cas: i64,
        want: u8,
    },
}

impl Query {
    pub fn method(&self) -> Method {
        match self {
            Query::Ping => Method::Ping,
            Query::FindNode { .. } => Method::FindNode,
            Query::FindPeer { .. } => Method::FindPeer,
            Query::AnnouncePeer { .. } => Method::AnnouncePeer,
            Query::StoreValue { .. } => Method::StoreValue,
            Query::FindValue { .. } => Method::FindValue,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ping,
    FindNode {
        nodes4: Vec<NodeInfo>,
        nodes6: Vec<NodeInfo>,
        token: Option<u32>,
    },
    FindPeer {
        peers: Vec<PeerInfo>,
        nodes4: Vec<NodeInfo>,
        nodes6: Vec<NodeInfo>,
        token: Option<u32>,
    },
    AnnouncePeer,
    StoreValue,
    FindValue {
        value: Option<Value>,
        nodes4: Vec<NodeInfo>,
        nodes6: Vec<NodeInfo>,
        token: Option<u32>,
    },
}

impl Response {
    pub fn method(&self) -> Method {
        match self {
            Response::Ping => Method::Ping,
            Response::FindNode { .. } => Method::FindNode,
            Response::FindPeer { .. } => Method::FindPeer,
            Response::AnnouncePeer => Method::AnnouncePeer,
            Response::StoreValue => Method::StoreValue,
            Response::FindValue { .. } => Method::FindValue,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Query(Query),
    Response(Response),
    Error { code: ErrorCode, message: String },
}

/// A fully decoded envelope: `y` (type|method), `t` (txid), body, optional `v`
/// and optional `i` (the sender's own id, stamped by `RpcEngine` on every
/// outbound message so the receiver can feed its routing table).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub txid: u32,
    pub version: Option<i32>,
    pub sender: Option<Id>,
    pub body: Body,
}

impl Envelope {
    pub fn query(txid: u32, query: Query) -> Self {
        Envelope {
            txid,
            version: None,
            sender: None,
            body: Body::Query(query),
        }
    }

    pub fn response(txid: u32, response: Response) -> Self {
        Envelope {
            txid,
            version: None,
            sender: None,
            body: Body::Response(response),
        }
    }

    pub fn error(txid: u32, err: DhtError) -> Self {
        Envelope {
            txid,
            version: None,
            sender: None,
            body: Body::Error {
                code: err.code,
                message: err.message,
            },
        }
    }

    /// Stamp this envelope with the sending node's own id.
    pub fn with_sender(mut self, sender: Id) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn method(&self) -> Option<Method> {
        match &self.body {
            Body::Query(q) => Some(q.method()),
            Body::Response(r) => Some(r.method()),
            Body::Error { .. } => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.body {
            Body::Query(_) => MessageKind::Request,
            Body::Response(_) => MessageKind::Response,
            Body::Error { .. } => MessageKind::Error,
        }
    }
}

/// Internal flat wire representation: one struct with every possible field,
/// present-or-absent per method. Lets `#[derive(Serialize, Deserialize)]`
/// produce the single-character-keyed CBOR/JSON map described in spec.md
/// §4.2 while `Envelope`/`Query`/`Response` stay a proper typed enum — the
/// conversion between the two lives in `codec.rs`, not in serde magic
/// (teacher precedent: `lib-protocols` hand-rolls canonical serialization
/// whenever derive alone can't express the wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    pub y: u8,
    pub t: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<WireArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<WireArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<WireErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireErrorBody {
    pub c: u16,
    pub m: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WireArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes4: Vec<NodeInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes6: Vec<NodeInfo>,
}
