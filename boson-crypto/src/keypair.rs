//! Ed25519 signing plus the X25519 box derived from the same key material.
//!
//! A Boson node's [`Id`] is its Ed25519 public key, so `Keypair` is the single
//! object a node uses for both signing and Diffie-Hellman: the Ed25519 seed is
//! mapped onto a Curve25519 scalar via the standard birational map (the same
//! technique the teacher's `classical::curve25519` module uses for ring
//! signature key images), giving an X25519 key without carrying a second
//! keypair around.

use std::sync::atomic::{AtomicBool, Ordering};

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::id::Id;

pub const SIGNATURE_LENGTH: usize = 64;

/// An Ed25519 signing key plus its derived [`Id`]. The seed is held in a
/// zeroizing buffer and the key is poisoned (all operations fail) once
/// [`Keypair::destroy`] has been called — signing/decrypting with destroyed
/// key material is a programming error the caller must not be able to mask.
pub struct Keypair {
    signing_key: SigningKey,
    seed: Zeroizing<[u8; 32]>,
    id: Id,
    destroyed: AtomicBool,
}

impl Keypair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let seed = Zeroizing::new(signing_key.to_bytes());
        let id = Id::from_bytes(*signing_key.verifying_key().as_bytes());
        Keypair {
            signing_key,
            seed,
            id,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(CryptoError::Destroyed)
        } else {
            Ok(())
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH]> {
        self.check_alive()?;
        Ok(self.signing_key.sign(message).to_bytes())
    }

    /// X25519 scalar derived from this keypair's Ed25519 seed: `clamp(SHA-512(seed)[..32])`.
    fn dh_scalar_bytes(&self) -> Result<[u8; 32]> {
        self.check_alive()?;
        let mut hasher = Sha512::new();
        hasher.update(self.seed.as_slice());
        let digest = hasher.finalize();
        let mut scalar = [0u8; 32];
        scalar.copy_from_slice(&digest[..32]);
        Ok(scalar)
    }

    /// Derive the box context shared with `counterparty`. Expensive (one
    /// scalar multiplication); callers should go through
    /// [`crate::box_context::BoxContextCache`] to amortize repeat lookups.
    pub fn create_crypto_context(&self, counterparty: &Id) -> Result<super::box_context::BoxContext> {
        let scalar = self.dh_scalar_bytes()?;
        let compressed = CompressedEdwardsY(counterparty.to_bytes());
        let edwards_point = compressed.decompress().ok_or(CryptoError::InvalidPoint)?;
        let montgomery = edwards_point.to_montgomery();
        let shared_point = montgomery.mul_clamped(scalar);
        super::box_context::BoxContext::from_shared_secret(shared_point.to_bytes())
    }

    /// Zeroizes the seed and poisons the keypair. Idempotent.
    pub fn destroy(&mut self) {
        self.seed.iter_mut().for_each(|b| *b = 0);
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Verify a standalone signature without owning a [`Keypair`] — used by
/// handlers checking a remote peer's signature on an announcement or value.
pub fn verify(message: &[u8], signature: &[u8], public_key: &Id) -> bool {
    let sig = match <[u8; SIGNATURE_LENGTH]>::try_from(signature) {
        Ok(bytes) => Signature::from_bytes(&bytes),
        Err(_) => return false,
    };
    let verifying_key = match VerifyingKey::from_bytes(public_key.as_bytes()) {
        Ok(k) => k,
        Err(_) => return false,
    };
    verifying_key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = Keypair::generate();
        let msg = b"boson wire message";
        let sig = kp.sign(msg).unwrap();
        assert!(verify(msg, &sig, &kp.id()));
        assert!(!verify(b"tampered", &sig, &kp.id()));
    }

    #[test]
    fn destroyed_keypair_refuses_to_sign() {
        let mut kp = Keypair::generate();
        kp.destroy();
        assert!(matches!(kp.sign(b"x"), Err(CryptoError::Destroyed)));
    }

    #[test]
    fn box_context_is_symmetric_between_counterparties() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let ctx_a = alice.create_crypto_context(&bob.id()).unwrap();
        let ctx_b = bob.create_crypto_context(&alice.id()).unwrap();

        let plain = b"shared secret must match";
        let nonce = [7u8; 24];
        let cipher = ctx_a.encrypt(&nonce, plain).unwrap();
        let decrypted = ctx_b.decrypt(&nonce, &cipher).unwrap();
        assert_eq!(plain.as_slice(), decrypted.as_slice());
    }
}
