//! `NodeInfo` — the `(Id, host, port)` tuple identifying a DHT participant.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use boson_crypto::Id;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `(Id, IP-or-host, port)` identifying a DHT participant, plus a
/// `version` integer that is local bookkeeping only — spec.md §3 pins the
/// wire form to exactly a 3-element array `[id, host, port]`, so `version`
/// never round-trips and is always `None` after deserializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: Id,
    pub address: SocketAddr,
    pub version: Option<i32>,
}

impl NodeInfo {
    pub fn new(id: Id, address: SocketAddr) -> Self {
        NodeInfo {
            id,
            address,
            version: None,
        }
    }

    pub fn with_version(id: Id, address: SocketAddr, version: i32) -> Self {
        NodeInfo {
            id,
            address,
            version: Some(version),
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }
}

impl Serialize for NodeInfo {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tup = serializer.serialize_tuple(3)?;
        tup.serialize_element(&self.id)?;
        tup.serialize_element(&self.address.ip())?;
        tup.serialize_element(&self.address.port())?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for NodeInfo {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodeInfoVisitor;

        impl<'de> Visitor<'de> for NodeInfoVisitor {
            type Value = NodeInfo;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a 3-element [id, host, port] array")
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<NodeInfo, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let id: Id = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let ip: IpAddr = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let port: u16 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                Ok(NodeInfo {
                    id,
                    address: SocketAddr::new(ip, port),
                    version: None,
                })
            }
        }

        deserializer.deserialize_tuple(3, NodeInfoVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_cbor_and_json() {
        let ni = NodeInfo::new(Id::random(), "127.0.0.1:6881".parse().unwrap());
        let mut cbor = Vec::new();
        ciborium::into_writer(&ni, &mut cbor).unwrap();
        let back: NodeInfo = ciborium::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(ni, back);

        let json = serde_json::to_string(&ni).unwrap();
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(ni, back);
    }

    #[test]
    fn json_wire_form_is_a_3_element_array() {
        let ni = NodeInfo::new(Id::random(), "127.0.0.1:6881".parse().unwrap());
        let json = serde_json::to_value(&ni).unwrap();
        let arr = json.as_array().expect("NodeInfo must serialize as an array");
        assert_eq!(arr.len(), 3);
    }

    #[test]
    fn version_is_local_bookkeeping_and_never_crosses_the_wire() {
        let ni = NodeInfo::with_version(Id::random(), "127.0.0.1:6881".parse().unwrap(), 7);
        let json = serde_json::to_string(&ni).unwrap();
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, None);
        assert_eq!(back.id, ni.id);
        assert_eq!(back.address, ni.address);
    }
}
