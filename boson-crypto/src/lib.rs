//! Identity and cryptographic primitives consumed by the Boson DHT: Ed25519
//! sign/verify, an X25519 box derived from the same key material, and the
//! [`Id`] type used as both node identity and public key throughout the rest
//! of the workspace.

pub mod box_context;
pub mod error;
pub mod id;
pub mod keypair;

pub use box_context::{BoxContext, BoxContextCache};
pub use error::{CryptoError, Result};
pub use id::{Distance, Id};
pub use keypair::Keypair;

/// SHA-256 digest used for immutable value ids (spec.md §3 literally asks for
/// SHA-256 here, not the workspace's usual BLAKE3).
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
