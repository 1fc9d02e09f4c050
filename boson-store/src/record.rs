//! Stored rows: a [`Value`]/[`PeerInfo`] plus the bookkeeping fields the
//! storage schema (spec.md §6) tracks alongside it.

use boson_proto::{Id, PeerInfo, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: Value,
    pub persistent: bool,
    /// Unix seconds.
    pub created: i64,
    pub updated: i64,
    pub last_announce: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPeer {
    pub peer: PeerInfo,
    pub persistent: bool,
    pub created: i64,
    pub updated: i64,
    pub last_announce: i64,
}

/// Composite key for the peers table: `(service_id, node_id)`, where
/// `service_id` is the DHT target the peer announced under and `node_id` is
/// `PeerInfo.id` (the announcing peer's own key) — spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerKey {
    pub service_id: Id,
    pub node_id: Id,
}
