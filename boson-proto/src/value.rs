//! The Value model (spec.md §3/§4.3): immutable, signed-mutable, and
//! encrypted-mutable records. Modeled as a tagged sum rather than an
//! inheritance tree (spec.md §9) — validation and mutation dispatch on the
//! tag instead of virtual dispatch.

use boson_crypto::{box_context::NONCE_LENGTH, sha256, verify, Id, Keypair};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const NONCE_LEN: usize = NONCE_LENGTH;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmutableValue {
    pub id: Id,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedValue {
    pub public_key: Id,
    pub nonce: [u8; NONCE_LEN],
    pub sequence_number: u64,
    pub signature: [u8; SIGNATURE_LEN],
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub public_key: Id,
    pub recipient: Id,
    pub nonce: [u8; NONCE_LEN],
    pub sequence_number: u64,
    pub signature: [u8; SIGNATURE_LEN],
    /// Ciphertext produced by the box cipher between `public_key` and
    /// `recipient` under `nonce`; the signature covers this ciphertext, not
    /// the plaintext, so verification never requires decryption.
    pub data: Vec<u8>,
}

/// One of the three value variants named in spec.md §3. `id()` returns the
/// value's storage key in every case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Value {
    Immutable(ImmutableValue),
    Signed(SignedValue),
    Encrypted(EncryptedValue),
}

fn signable_bytes(nonce: &[u8; NONCE_LEN], sequence_number: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NONCE_LEN + 8 + data.len());
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

impl Value {
    pub fn id(&self) -> Id {
        match self {
            Value::Immutable(v) => v.id,
            Value::Signed(v) => v.public_key,
            Value::Encrypted(v) => v.public_key,
        }
    }

    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            Value::Immutable(_) => None,
            Value::Signed(v) => Some(v.sequence_number),
            Value::Encrypted(v) => Some(v.sequence_number),
        }
    }

    pub fn is_mutable(&self) -> bool {
        !matches!(self, Value::Immutable(_))
    }

    pub fn data(&self) -> &[u8] {
        match self {
            Value::Immutable(v) => &v.data,
            Value::Signed(v) => &v.data,
            Value::Encrypted(v) => &v.data,
        }
    }

    /// Build an immutable value; `id` is the SHA-256 digest of `data`.
    pub fn immutable(data: Vec<u8>) -> Self {
        let id = Id::from_bytes(sha256(&data));
        Value::Immutable(ImmutableValue { id, data })
    }

    /// Build and sign a fresh mutable value at `sequence_number = 0`.
    pub fn signed(keypair: &Keypair, data: Vec<u8>) -> boson_crypto::Result<Self> {
        Self::signed_at(keypair, data, 0)
    }

    fn signed_at(keypair: &Keypair, data: Vec<u8>, sequence_number: u64) -> boson_crypto::Result<Self> {
        let nonce = random_nonce();
        let signature = keypair.sign(&signable_bytes(&nonce, sequence_number, &data))?;
        Ok(Value::Signed(SignedValue {
            public_key: keypair.id(),
            nonce,
            sequence_number,
            signature,
            data,
        }))
    }

    /// Build and sign an encrypted mutable value; `data` passed in is
    /// plaintext, encrypted under the box shared with `recipient`.
    pub fn encrypted(keypair: &Keypair, recipient: Id, plaintext: &[u8]) -> boson_crypto::Result<Self> {
        Self::encrypted_at(keypair, recipient, plaintext, 0)
    }

    fn encrypted_at(
        keypair: &Keypair,
        recipient: Id,
        plaintext: &[u8],
        sequence_number: u64,
    ) -> boson_crypto::Result<Self> {
        let nonce = random_nonce();
        let ctx = keypair.create_crypto_context(&recipient)?;
        let ciphertext = ctx.encrypt(&nonce, plaintext)?;
        let signature = keypair.sign(&signable_bytes(&nonce, sequence_number, &ciphertext))?;
        Ok(Value::Encrypted(EncryptedValue {
            public_key: keypair.id(),
            recipient,
            nonce,
            sequence_number,
            signature,
            data: ciphertext,
        }))
    }

    /// Re-validate the cryptographic check for this record: the SHA-256
    /// digest for immutable values, the signature for mutable ones.
    pub fn is_valid(&self) -> bool {
        match self {
            Value::Immutable(v) => sha256(&v.data) == v.id.to_bytes(),
            Value::Signed(v) => verify(
                &signable_bytes(&v.nonce, v.sequence_number, &v.data),
                &v.signature,
                &v.public_key,
            ),
            Value::Encrypted(v) => verify(
                &signable_bytes(&v.nonce, v.sequence_number, &v.data),
                &v.signature,
                &v.public_key,
            ),
        }
    }

    /// Produce a new record with `new_data`, a fresh nonce, and
    /// `sequence_number + 1`, re-signed with `keypair`. Requires the owning
    /// private key; fails if `self` isn't a mutable value owned by `keypair`.
    pub fn update(&self, keypair: &Keypair, new_data: Vec<u8>) -> boson_crypto::Result<Value> {
        match self {
            Value::Immutable(_) => Err(boson_crypto::CryptoError::InvalidSignature),
            Value::Signed(v) => {
                if v.public_key != keypair.id() {
                    return Err(boson_crypto::CryptoError::InvalidSignature);
                }
                Self::signed_at(keypair, new_data, v.sequence_number + 1)
            }
            Value::Encrypted(v) => {
                if v.public_key != keypair.id() {
                    return Err(boson_crypto::CryptoError::InvalidSignature);
                }
                Self::encrypted_at(keypair, v.recipient, &new_data, v.sequence_number + 1)
            }
        }
    }

    /// Decrypt an encrypted mutable value's plaintext using `keypair` (the
    /// recipient's key). No-op identity for the other two variants' `data()`.
    pub fn decrypt(&self, keypair: &Keypair) -> boson_crypto::Result<Vec<u8>> {
        match self {
            Value::Encrypted(v) => {
                let ctx = keypair.create_crypto_context(&v.public_key)?;
                ctx.decrypt(&v.nonce, &v.data)
            }
            Value::Immutable(v) => Ok(v.data.clone()),
            Value::Signed(v) => Ok(v.data.clone()),
        }
    }
}

/// A mutable value paired with the private key needed to call
/// [`Value::update`]. `without_private_key` yields an equal, read-only
/// [`Value`] that can no longer be mutated — the private key simply isn't
/// carried along, so there is nothing further to revoke.
pub struct OwnedValue {
    pub value: Value,
    private_key: Zeroizing<[u8; 32]>,
}

impl OwnedValue {
    pub fn new(value: Value, keypair_seed: [u8; 32]) -> Self {
        OwnedValue {
            value,
            private_key: Zeroizing::new(keypair_seed),
        }
    }

    pub fn keypair(&self) -> Keypair {
        Keypair::from_seed(*self.private_key)
    }

    pub fn without_private_key(self) -> Value {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_value_id_is_sha256_of_data() {
        let v = Value::immutable(b"hello boson".to_vec());
        assert!(v.is_valid());
        assert_eq!(v.id().to_bytes(), sha256(b"hello boson"));
    }

    #[test]
    fn tampering_with_immutable_data_invalidates_it() {
        let mut v = Value::immutable(b"hello".to_vec());
        if let Value::Immutable(ref mut iv) = v {
            iv.data = b"tampered".to_vec();
        }
        assert!(!v.is_valid());
    }

    #[test]
    fn signed_value_updates_increment_sequence_and_preserve_id() {
        let kp = Keypair::generate();
        let v0 = Value::signed(&kp, b"v0".to_vec()).unwrap();
        assert_eq!(v0.sequence_number(), Some(0));
        assert!(v0.is_valid());

        let v1 = v0.update(&kp, b"v1".to_vec()).unwrap();
        assert_eq!(v1.sequence_number(), Some(1));
        assert_eq!(v1.id(), v0.id());
        assert!(v1.is_valid());
    }

    #[test]
    fn encrypted_value_round_trips_and_validates() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();
        let v = Value::encrypted(&sender, recipient.id(), b"top secret").unwrap();
        assert!(v.is_valid());
        let plain = v.decrypt(&recipient).unwrap();
        assert_eq!(plain, b"top secret");
    }

    #[test]
    fn update_fails_for_non_owning_keypair() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let v0 = Value::signed(&kp, b"v0".to_vec()).unwrap();
        assert!(v0.update(&other, b"v1".to_vec()).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_immutable_value_round_trips_through_cbor_and_stays_valid(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let v = Value::immutable(data);
            prop_assert!(v.is_valid());

            let mut cbor = Vec::new();
            ciborium::into_writer(&v, &mut cbor).unwrap();
            let back: Value = ciborium::from_reader(cbor.as_slice()).unwrap();
            prop_assert_eq!(back.id(), v.id());
            prop_assert_eq!(back.data(), v.data());
            prop_assert!(back.is_valid());
        }

        #[test]
        fn any_signed_value_round_trips_through_cbor_and_stays_valid(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let kp = Keypair::generate();
            let v = Value::signed(&kp, data).unwrap();
            prop_assert!(v.is_valid());

            let mut cbor = Vec::new();
            ciborium::into_writer(&v, &mut cbor).unwrap();
            let back: Value = ciborium::from_reader(cbor.as_slice()).unwrap();
            prop_assert_eq!(back.id(), v.id());
            prop_assert_eq!(back.sequence_number(), v.sequence_number());
            prop_assert!(back.is_valid());
        }
    }
}
