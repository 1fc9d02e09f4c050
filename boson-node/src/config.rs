//! Node Controller configuration (spec.md §6's CLI surface, minus the
//! launcher itself — that stays out of scope per spec.md §1's Non-goals;
//! this only exposes the options the Node Controller itself understands).

use std::net::SocketAddr;
use std::path::PathBuf;

use boson_proto::NodeInfo;

#[derive(Debug, Clone, Default)]
pub struct NodeControllerConfig {
    /// Local IPv4 bind address, if this node should run an IPv4 instance.
    pub address4: Option<SocketAddr>,
    /// Local IPv6 bind address, if this node should run an IPv6 instance.
    pub address6: Option<SocketAddr>,
    /// Directory for the storage snapshot; `None` runs fully in-memory.
    pub data_dir: Option<PathBuf>,
    /// Seed nodes queried during bootstrap (`--bootstrap id:addr:port`,
    /// repeatable).
    pub bootstrap: Vec<NodeInfo>,
    /// Ed25519 seed for this node's persistent identity. `None` generates a
    /// fresh one, matching `--developerMode`'s throwaway-identity behavior.
    pub key_seed: Option<[u8; 32]>,
    /// Relaxes timing (shorter bootstrap/refresh intervals) for local
    /// multi-node testing (`--developerMode`).
    pub developer_mode: bool,
}

impl NodeControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("storage.cbor"))
    }
}
