//! Timing defaults for storage expiration and republication (spec.md §4.4).
//! Not pinned by the spec's literal text; chosen to match common Kademlia
//! deployments (BEP44/BEP5-scale TTLs) and documented as an Open Question
//! resolution in DESIGN.md.

use std::time::Duration;

pub const MAX_VALUE_AGE: Duration = Duration::from_secs(2 * 60 * 60);
pub const MAX_PEER_AGE: Duration = Duration::from_secs(30 * 60);
pub const STORAGE_EXPIRE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Schema version recorded in a snapshot file; a mismatch at load time
/// triggers a destructive recreation per spec.md §6's `user_version` rule
/// (there is no migration path below the rule's own v4 threshold, and this
/// workspace starts the scheme at v4 directly).
pub const STORAGE_SNAPSHOT_VERSION: u32 = 4;
