use boson_proto::DhtError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("call timed out after {0} retries")]
    Timeout(u32),
    #[error("call cancelled")]
    Cancelled,
    #[error("remote returned an error: {0}")]
    Remote(#[from] DhtError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("throttled: too many in-flight requests to this endpoint")]
    Throttled,
}

pub type Result<T> = std::result::Result<T, RpcError>;
