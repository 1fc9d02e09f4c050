use thiserror::Error;

/// Errors raised by identity and cryptographic operations.
///
/// These are local failures (bad key material, destroyed keys); they never
/// carry a wire error code — `boson-proto::ErrorCode` is where a verification
/// failure becomes a protocol-visible 206.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("malformed id string: {0}")]
    MalformedId(String),

    #[error("keypair has been destroyed")]
    Destroyed,

    #[error("AEAD operation failed")]
    AeadFailure,

    #[error("point decompression failed")]
    InvalidPoint,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
