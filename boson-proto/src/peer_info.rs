//! `PeerInfo` — a signed service announcement (spec.md §3/§4.3).

use boson_crypto::{verify, Id, Keypair};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{DhtError, Result};
use crate::value::{NONCE_LEN, SIGNATURE_LEN};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: Id,
    pub nonce: [u8; NONCE_LEN],
    pub sequence_number: u64,
    pub signature: [u8; SIGNATURE_LEN],
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes_opt")]
    pub extra_data: Option<Vec<u8>>,
    /// Present together with `node_signature`, or not at all: a node that
    /// endorses this announcement, making the peer "authenticated".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_signature: Option<[u8; SIGNATURE_LEN]>,
}

mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => serde_bytes::Bytes::new(bytes).serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let buf = Option::<serde_bytes::ByteBuf>::deserialize(d)?;
        Ok(buf.map(|b| b.into_vec()))
    }
}

fn announcement_bytes(
    nonce: &[u8; NONCE_LEN],
    sequence_number: u64,
    endpoint: &str,
    fingerprint: Option<i64>,
    extra_data: Option<&[u8]>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NONCE_LEN + 8 + endpoint.len() + 16);
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(endpoint.as_bytes());
    if let Some(fp) = fingerprint {
        buf.push(1);
        buf.extend_from_slice(&fp.to_be_bytes());
    } else {
        buf.push(0);
    }
    if let Some(extra) = extra_data {
        buf.push(1);
        buf.extend_from_slice(extra);
    } else {
        buf.push(0);
    }
    buf
}

fn node_endorsement_bytes(peer_id: &Id, nonce: &[u8; NONCE_LEN], sequence_number: u64, signature: &[u8; SIGNATURE_LEN]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + NONCE_LEN + 8 + SIGNATURE_LEN);
    buf.extend_from_slice(peer_id.as_bytes());
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(signature);
    buf
}

impl PeerInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        keypair: &Keypair,
        sequence_number: u64,
        endpoint: String,
        fingerprint: Option<i64>,
        extra_data: Option<Vec<u8>>,
    ) -> boson_crypto::Result<Self> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let signature = keypair.sign(&announcement_bytes(
            &nonce,
            sequence_number,
            &endpoint,
            fingerprint,
            extra_data.as_deref(),
        ))?;
        Ok(PeerInfo {
            id: keypair.id(),
            nonce,
            sequence_number,
            signature,
            endpoint,
            fingerprint,
            extra_data,
            node_id: None,
            node_signature: None,
        })
    }

    /// Have a DHT node endorse this announcement, turning it into an
    /// authenticated peer.
    pub fn authenticate(mut self, node_keypair: &Keypair) -> boson_crypto::Result<Self> {
        let sig = node_keypair.sign(&node_endorsement_bytes(
            &self.id,
            &self.nonce,
            self.sequence_number,
            &self.signature,
        ))?;
        self.node_id = Some(node_keypair.id());
        self.node_signature = Some(sig);
        Ok(self)
    }

    pub fn is_authenticated(&self) -> bool {
        self.node_id.is_some() && self.node_signature.is_some()
    }

    /// `node_id`/`node_signature` must be both present or both absent;
    /// anything else is malformed (spec.md §3).
    pub fn has_consistent_authentication(&self) -> bool {
        self.node_id.is_some() == self.node_signature.is_some()
    }

    pub fn is_valid(&self) -> bool {
        if !self.has_consistent_authentication() {
            return false;
        }
        let peer_ok = verify(
            &announcement_bytes(
                &self.nonce,
                self.sequence_number,
                &self.endpoint,
                self.fingerprint,
                self.extra_data.as_deref(),
            ),
            &self.signature,
            &self.id,
        );
        if !peer_ok {
            return false;
        }
        match (self.node_id, self.node_signature) {
            (Some(node_id), Some(node_sig)) => verify(
                &node_endorsement_bytes(&self.id, &self.nonce, self.sequence_number, &self.signature),
                &node_sig,
                &node_id,
            ),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DhtError::invalid_signature())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_peer_info_round_trips_and_validates() {
        let kp = Keypair::generate();
        let peer = PeerInfo::create(&kp, 0, "https://example.boson/svc".into(), Some(42), None).unwrap();
        assert!(peer.is_valid());
        assert!(!peer.is_authenticated());

        let mut cbor = Vec::new();
        ciborium::into_writer(&peer, &mut cbor).unwrap();
        let back: PeerInfo = ciborium::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(peer, back);
    }

    #[test]
    fn authenticated_peer_requires_valid_node_signature() {
        let peer_kp = Keypair::generate();
        let node_kp = Keypair::generate();
        let peer = PeerInfo::create(&peer_kp, 0, "https://example.boson/svc".into(), None, None)
            .unwrap()
            .authenticate(&node_kp)
            .unwrap();
        assert!(peer.is_valid());
        assert!(peer.is_authenticated());
    }

    #[test]
    fn tampered_endpoint_invalidates_signature() {
        let kp = Keypair::generate();
        let mut peer = PeerInfo::create(&kp, 0, "https://example.boson/svc".into(), None, None).unwrap();
        peer.endpoint = "https://evil.example/svc".into();
        assert!(!peer.is_valid());
    }
}
