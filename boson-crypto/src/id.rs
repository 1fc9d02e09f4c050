//! The 256-bit node/value identifier that doubles as an Ed25519 public key.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CryptoError, Result};

pub const ID_LENGTH: usize = 32;

/// DID prefix accepted when parsing an `Id` from text (teacher's `lib-identity::did`
/// convention), never emitted — `Id::to_string()` always produces plain Base58.
pub const DID_PREFIX: &str = "did:boson:";

/// A 256-bit opaque identifier. Doubles as an Ed25519 public key for node and
/// mutable-value identities; for immutable values it is the SHA-256 digest of
/// the stored data.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_LENGTH]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_LENGTH]);

    pub fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; ID_LENGTH] {
        self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ID_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: ID_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; ID_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Id(out))
    }

    /// Kademlia XOR metric between two ids, interpreted as a 256-bit integer.
    pub fn distance(&self, other: &Id) -> Distance {
        let mut out = [0u8; ID_LENGTH];
        for i in 0..ID_LENGTH {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Index (0..=255) of the highest differing bit, counted from the most
    /// significant bit of the distance — used to pick which bucket an id
    /// belongs to relative to the owner's prefix.
    pub fn bucket_index(&self, owner: &Id) -> usize {
        self.distance(owner).leading_zero_bits()
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
        Id(bytes)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl FromStr for Id {
    type Err = CryptoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let encoded = s.strip_prefix(DID_PREFIX).unwrap_or(s);
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| CryptoError::MalformedId(e.to_string()))?;
        Id::from_slice(&bytes)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor {
            human_readable: bool,
        }

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.human_readable {
                    write!(f, "a Base58 or did:boson: id string")
                } else {
                    write!(f, "32 raw id bytes")
                }
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Id, E>
            where
                E: de::Error,
            {
                Id::from_str(v).map_err(de::Error::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Id, E>
            where
                E: de::Error,
            {
                Id::from_slice(v).map_err(de::Error::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Id, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut bytes = [0u8; ID_LENGTH];
                for slot in bytes.iter_mut() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(ID_LENGTH, &self))?;
                }
                Ok(Id(bytes))
            }
        }

        let human_readable = deserializer.is_human_readable();
        if human_readable {
            deserializer.deserialize_str(IdVisitor { human_readable })
        } else {
            deserializer.deserialize_bytes(IdVisitor { human_readable })
        }
    }
}

/// XOR distance between two [`Id`]s, ordered as a 256-bit big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_LENGTH]);

impl Distance {
    pub fn leading_zero_bits(&self) -> usize {
        for (byte_index, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return byte_index * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_LENGTH * 8
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_for_equal_ids() {
        let a = Id::random();
        let b = Id::random();
        assert_eq!(a.distance(&b).as_bytes(), b.distance(&a).as_bytes());
        assert_eq!(a.distance(&a).leading_zero_bits(), ID_LENGTH * 8);
    }

    #[test]
    fn base58_round_trips() {
        let id = Id::random();
        let encoded = id.to_string();
        let decoded: Id = encoded.parse().unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn did_prefixed_string_parses() {
        let id = Id::random();
        let did = format!("{}{}", DID_PREFIX, id);
        let decoded: Id = did.parse().unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn serde_json_uses_base58_and_cbor_uses_raw_bytes() {
        let id = Id::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let mut cbor = Vec::new();
        ciborium::into_writer(&id, &mut cbor).unwrap();
        let back: Id = ciborium::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn ord_is_lexicographic_byte_order() {
        let mut a = Id::from_bytes([0u8; ID_LENGTH]);
        let mut b = Id::from_bytes([0u8; ID_LENGTH]);
        a.0[31] = 1;
        b.0[31] = 2;
        assert!(a < b);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_32_bytes_round_trip_through_base58(bytes in any::<[u8; ID_LENGTH]>()) {
            let id = Id::from_bytes(bytes);
            let decoded: Id = id.to_string().parse().unwrap();
            prop_assert_eq!(id, decoded);
        }

        #[test]
        fn any_32_bytes_round_trip_through_cbor(bytes in any::<[u8; ID_LENGTH]>()) {
            let id = Id::from_bytes(bytes);
            let mut cbor = Vec::new();
            ciborium::into_writer(&id, &mut cbor).unwrap();
            let back: Id = ciborium::from_reader(cbor.as_slice()).unwrap();
            prop_assert_eq!(id, back);
        }

        #[test]
        fn distance_to_self_always_has_the_full_bit_width_of_leading_zeros(bytes in any::<[u8; ID_LENGTH]>()) {
            let id = Id::from_bytes(bytes);
            prop_assert_eq!(id.distance(&id).leading_zero_bits(), ID_LENGTH * 8);
        }
    }
}
