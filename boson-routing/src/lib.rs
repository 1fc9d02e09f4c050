//! Kademlia routing table for the Boson DHT (spec.md §4.5 / C5): the
//! K-bucket tree, its replacement cache, and the home-bucket splitting
//! heuristic that keeps resolution high near the owner's own id.

mod bucket;
mod constants;
mod entry;
mod table;

pub use bucket::Bucket;
pub use constants::{BUCKET_REFRESH_INTERVAL, ID_BITS, K, MAX_TIMEOUTS};
pub use entry::KBucketEntry;
pub use table::{now, AddOutcome, RoutingTable};
