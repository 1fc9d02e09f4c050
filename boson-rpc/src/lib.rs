//! RPC engine and token manager for the Boson DHT (spec.md §4.6/§4.7 / C6,
//! C7): transaction matching, adaptive per-endpoint timeouts, retries,
//! throttling, and rotating write-admission tokens.

mod constants;
mod engine;
mod error;
mod throttle;
mod timeout_sampler;
mod token_manager;
mod transport;

pub use constants::*;
pub use engine::{InboundRequest, RpcEngine};
pub use error::{Result, RpcError};
pub use throttle::Throttle;
pub use timeout_sampler::TimeoutSampler;
pub use token_manager::TokenManager;
pub use transport::{ChannelTransport, Transport, UdpTransport};
