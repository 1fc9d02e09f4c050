//! Wire protocol and data model for the Boson DHT: the envelope (spec.md
//! §4.2), the Value and PeerInfo records (spec.md §4.3), and NodeInfo.

pub mod codec;
pub mod error;
pub mod message;
pub mod node_info;
pub mod peer_info;
pub mod value;

pub use boson_crypto::Id;
pub use codec::{decode_cbor, decode_json, encode_cbor, encode_json, frame, unframe};
pub use error::{DhtError, ErrorCode, Result};
pub use message::{Body, Envelope, MessageKind, Method, Query, Response, WANT_IPV4, WANT_IPV6, WANT_TOKEN};
pub use node_info::NodeInfo;
pub use peer_info::PeerInfo;
pub use value::{EncryptedValue, ImmutableValue, OwnedValue, SignedValue, Value};
