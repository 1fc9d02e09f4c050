//! Authenticated encryption between two counterparties, keyed by a derived
//! X25519 shared secret (see [`crate::keypair::Keypair::create_crypto_context`]).

use std::num::NonZeroUsize;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use lru::LruCache;
use sha2::Sha256;

use crate::error::{CryptoError, Result};
use crate::id::Id;

pub const NONCE_LENGTH: usize = 24;

/// Default capacity of [`BoxContextCache`], grounded in the teacher's
/// `lru::LruCache` usage for its handshake nonce cache and tiered storage
/// cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// A derived `XChaCha20Poly1305` key shared with one counterparty.
pub struct BoxContext {
    cipher: XChaCha20Poly1305,
}

impl BoxContext {
    pub(crate) fn from_shared_secret(shared_secret: [u8; 32]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, &shared_secret);
        let mut key = [0u8; 32];
        hk.expand(b"boson-dht-box-v1", &mut key)
            .map_err(|_| CryptoError::AeadFailure)?;
        Ok(BoxContext {
            cipher: XChaCha20Poly1305::new((&key).into()),
        })
    }

    pub fn encrypt(&self, nonce: &[u8; NONCE_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::AeadFailure)
    }

    pub fn decrypt(&self, nonce: &[u8; NONCE_LENGTH], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AeadFailure)
    }

    pub fn encrypt_with_ad(
        &self,
        nonce: &[u8; NONCE_LENGTH],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::AeadFailure)
    }

    pub fn decrypt_with_ad(
        &self,
        nonce: &[u8; NONCE_LENGTH],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::AeadFailure)
    }
}

/// Bounded LRU of derived [`BoxContext`]s keyed by counterparty [`Id`], so a
/// node doesn't repeat the scalar multiplication on every encrypted message
/// exchanged with the same peer.
pub struct BoxContextCache<'k> {
    keypair: &'k crate::keypair::Keypair,
    cache: LruCache<Id, std::sync::Arc<BoxContext>>,
}

impl<'k> BoxContextCache<'k> {
    pub fn new(keypair: &'k crate::keypair::Keypair) -> Self {
        Self::with_capacity(keypair, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(keypair: &'k crate::keypair::Keypair, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        BoxContextCache {
            keypair,
            cache: LruCache::new(capacity),
        }
    }

    pub fn get_or_derive(&mut self, counterparty: &Id) -> Result<std::sync::Arc<BoxContext>> {
        if let Some(ctx) = self.cache.get(counterparty) {
            return Ok(ctx.clone());
        }
        let ctx = std::sync::Arc::new(self.keypair.create_crypto_context(counterparty)?);
        self.cache.put(*counterparty, ctx.clone());
        Ok(ctx)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;

    #[test]
    fn cache_reuses_derived_context() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mut cache = BoxContextCache::with_capacity(&alice, 4);
        let ctx1 = cache.get_or_derive(&bob.id()).unwrap();
        assert_eq!(cache.len(), 1);
        let ctx2 = cache.get_or_derive(&bob.id()).unwrap();
        assert!(std::sync::Arc::ptr_eq(&ctx1, &ctx2));
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let alice = Keypair::generate();
        let mut cache = BoxContextCache::with_capacity(&alice, 1);
        let bob = Keypair::generate();
        let carol = Keypair::generate();
        cache.get_or_derive(&bob.id()).unwrap();
        cache.get_or_derive(&carol.id()).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
