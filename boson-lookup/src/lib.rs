//! Iterative lookup (spec.md §4.8 / C8): the α-bounded FIND_NODE/FIND_VALUE/
//! FIND_PEER walk built on top of `boson-routing` and `boson-rpc`.

mod candidates;
mod cancel;
mod constants;
mod lookup;

pub use candidates::CandidateSet;
pub use cancel::CancelToken;
pub use constants::{ALPHA, LOOKUP_TIMEOUT};
pub use lookup::{
    lookup_node, lookup_peer, lookup_value, NodeLookupResult, PeerLookupResult, ResponseOutcome,
    ValueLookupResult, DEFAULT_WANT,
};
