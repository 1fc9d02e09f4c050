use std::time::Duration;

/// Standard Kademlia bucket size.
pub const K: usize = 8;

/// Bit width of an [`boson_crypto::Id`].
pub const ID_BITS: usize = 256;

/// Consecutive failures before an entry is replaced from the cache
/// (spec.md §4.5).
pub const MAX_TIMEOUTS: u32 = 3;

/// A bucket untouched for this long is due for a self-FIND_NODE refresh
/// (spec.md §4.5).
pub const BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
