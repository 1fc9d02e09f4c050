//! Local storage of DHT values and peer announcements: upsert semantics,
//! monotonic/CAS write rules, expiration, and republication bookkeeping
//! (spec.md §4.4).

pub mod constants;
pub mod record;
pub mod snapshot;
pub mod store;

pub use record::{PeerKey, StoredPeer, StoredValue};
pub use snapshot::{SnapshotError, SnapshotFile};
pub use store::Storage;
