//! The local value/peer store (spec.md §4.4): upsert semantics, CAS,
//! monotonic sequence enforcement, and the periodic expiration sweep.
//!
//! Backed by a `HashMap` guarded by a `tokio::sync::RwLock` (teacher
//! precedent: `DhtStorage`'s `HashMap<String, StorageEntry>`), matching
//! spec.md §5's requirement that the storage layer serialize writes
//! internally while reads can proceed concurrently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use boson_proto::{DhtError, ErrorCode, Id, PeerInfo, Value};
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{MAX_PEER_AGE, MAX_VALUE_AGE, STORAGE_EXPIRE_INTERVAL, STORAGE_SNAPSHOT_VERSION};
use crate::record::{PeerKey, StoredPeer, StoredValue};
use crate::snapshot::{self, SnapshotError, SnapshotFile};

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Default)]
struct Inner {
    values: HashMap<Id, StoredValue>,
    peers: HashMap<PeerKey, StoredPeer>,
}

pub struct Storage {
    inner: RwLock<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            inner: RwLock::new(Inner::default()),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(path: PathBuf) -> Self {
        Storage {
            inner: RwLock::new(Inner::default()),
            snapshot_path: Some(path),
        }
    }

    /// Load a prior snapshot from disk, if a path was configured and a file
    /// exists there. A version mismatch recreates empty tables rather than
    /// failing startup (spec.md §6's v4 destructive-recreation rule).
    pub async fn load(&self) -> Result<(), SnapshotError> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        match snapshot::load(path).await {
            Ok(Some(file)) => {
                let mut inner = self.inner.write().await;
                inner.values = file.values.into_iter().collect();
                inner.peers = file.peers.into_iter().collect();
                info!(values = inner.values.len(), peers = inner.peers.len(), "loaded storage snapshot");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(SnapshotError::VersionMismatch { found, expected }) => {
                warn!(found, expected, "snapshot schema mismatch, starting from empty tables");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self) -> Result<(), SnapshotError> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        let inner = self.inner.read().await;
        let file = SnapshotFile {
            version: STORAGE_SNAPSHOT_VERSION,
            values: inner.values.iter().map(|(k, v)| (*k, v.clone())).collect(),
            peers: inner.peers.iter().map(|(k, v)| (*k, v.clone())).collect(),
        };
        drop(inner);
        snapshot::save(path, file).await
    }

    pub async fn get_value(&self, id: &Id) -> Option<Value> {
        let inner = self.inner.read().await;
        let row = inner.values.get(id)?;
        if is_expired(row.persistent, row.updated, MAX_VALUE_AGE) {
            return None;
        }
        Some(row.value.clone())
    }

    /// `expected_sequence = Some(n)` requests a CAS write: the stored record
    /// must currently be at sequence `n`. `None` performs an unconditional
    /// write, still subject to the monotonic-sequence rule.
    pub async fn put_value(
        &self,
        value: Value,
        expected_sequence: Option<u64>,
        persistent: bool,
        update_last_announce: bool,
    ) -> Result<(), DhtError> {
        if !value.is_valid() {
            return Err(DhtError::invalid_signature());
        }
        let mut inner = self.inner.write().await;
        let id = value.id();
        let existing = inner.values.get(&id);
        check_sequence(existing, expected_sequence, &value)?;

        let ts = now();
        let created = existing.map(|r| r.created).unwrap_or(ts);
        let last_announce = if update_last_announce {
            ts
        } else {
            existing.map(|r| r.last_announce).unwrap_or(0)
        };
        inner.values.insert(
            id,
            StoredValue {
                value,
                persistent,
                created,
                updated: ts,
                last_announce,
            },
        );
        debug!(%id, "value upserted");
        Ok(())
    }

    pub async fn remove_value(&self, id: &Id) -> bool {
        self.inner.write().await.values.remove(id).is_some()
    }

    pub async fn get_peer(&self, service_id: &Id, node_id: &Id) -> Option<PeerInfo> {
        let key = PeerKey {
            service_id: *service_id,
            node_id: *node_id,
        };
        let inner = self.inner.read().await;
        let row = inner.peers.get(&key)?;
        if is_expired(row.persistent, row.updated, MAX_PEER_AGE) {
            return None;
        }
        Some(row.peer.clone())
    }

    /// Up to `max` random, non-expired peers announced under `service_id`.
    pub async fn get_peers(&self, service_id: &Id, max: usize) -> Vec<PeerInfo> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<&PeerInfo> = inner
            .peers
            .iter()
            .filter(|(k, row)| k.service_id == *service_id && !is_expired(row.persistent, row.updated, MAX_PEER_AGE))
            .map(|(_, row)| &row.peer)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.into_iter().take(max).cloned().collect()
    }

    pub async fn put_peer(
        &self,
        service_id: Id,
        peer: PeerInfo,
        persistent: bool,
        update_last_announce: bool,
    ) -> Result<(), DhtError> {
        peer.validate()?;
        let key = PeerKey {
            service_id,
            node_id: peer.id,
        };
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.peers.get(&key) {
            if peer.sequence_number <= existing.peer.sequence_number {
                return Err(DhtError::sequence_not_monotonic());
            }
        }
        let ts = now();
        let created = inner.peers.get(&key).map(|r| r.created).unwrap_or(ts);
        let last_announce = if update_last_announce {
            ts
        } else {
            inner.peers.get(&key).map(|r| r.last_announce).unwrap_or(0)
        };
        inner.peers.insert(
            key,
            StoredPeer {
                peer,
                persistent,
                created,
                updated: ts,
                last_announce,
            },
        );
        Ok(())
    }

    pub async fn update_value_last_announce(&self, id: &Id) {
        if let Some(row) = self.inner.write().await.values.get_mut(id) {
            row.last_announce = now();
        }
    }

    pub async fn update_peer_last_announce(&self, service_id: &Id, node_id: &Id) {
        let key = PeerKey {
            service_id: *service_id,
            node_id: *node_id,
        };
        if let Some(row) = self.inner.write().await.peers.get_mut(&key) {
            row.last_announce = now();
        }
    }

    /// Persistent values whose last republish is older than
    /// `last_announce_before` (unix seconds) — due for re-announcement.
    pub async fn get_persistent_values(&self, last_announce_before: i64) -> Vec<Value> {
        let inner = self.inner.read().await;
        inner
            .values
            .values()
            .filter(|row| row.persistent && row.last_announce < last_announce_before)
            .map(|row| row.value.clone())
            .collect()
    }

    pub async fn get_persistent_peers(&self, last_announce_before: i64) -> Vec<(Id, PeerInfo)> {
        let inner = self.inner.read().await;
        inner
            .peers
            .iter()
            .filter(|(_, row)| row.persistent && row.last_announce < last_announce_before)
            .map(|(key, row)| (key.service_id, row.peer.clone()))
            .collect()
    }

    pub async fn get_all_values(&self) -> Vec<Value> {
        self.inner.read().await.values.values().map(|r| r.value.clone()).collect()
    }

    pub async fn get_all_peers(&self) -> Vec<(Id, PeerInfo)> {
        self.inner
            .read()
            .await
            .peers
            .iter()
            .map(|(k, row)| (k.service_id, row.peer.clone()))
            .collect()
    }

    /// Delete non-persistent rows older than their max age. Persistent rows
    /// never expire — only age-based removal, independent of republication.
    pub async fn expire(&self) -> (usize, usize) {
        let cutoff_value = now() - MAX_VALUE_AGE.as_secs() as i64;
        let cutoff_peer = now() - MAX_PEER_AGE.as_secs() as i64;
        let mut inner = self.inner.write().await;
        let before_values = inner.values.len();
        inner
            .values
            .retain(|_, row| row.persistent || row.updated >= cutoff_value);
        let before_peers = inner.peers.len();
        inner
            .peers
            .retain(|_, row| row.persistent || row.updated >= cutoff_peer);
        (before_values - inner.values.len(), before_peers - inner.peers.len())
    }

    /// Spawn the periodic expiration sweep as a background task.
    pub fn spawn_expiration_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STORAGE_EXPIRE_INTERVAL);
            loop {
                interval.tick().await;
                let (values, peers) = self.expire().await;
                if values > 0 || peers > 0 {
                    debug!(values, peers, "expiration sweep removed stale rows");
                }
            }
        })
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

/// CAS/monotonic-sequence admission check for `put_value`, pulled out so the
/// "existing mutable, new immutable" edge case can be exercised without a
/// SHA-256 preimage of a real public key.
fn check_sequence(existing: Option<&StoredValue>, expected_sequence: Option<u64>, new_value: &Value) -> Result<(), DhtError> {
    if let Some(expected) = expected_sequence {
        return match existing.and_then(|r| r.value.sequence_number()) {
            Some(current) if current == expected => Ok(()),
            _ => Err(DhtError::cas_fail()),
        };
    }
    let Some(existing_row) = existing else {
        return Ok(());
    };
    match (existing_row.value.sequence_number(), new_value.sequence_number()) {
        (Some(existing_seq), Some(new_seq)) => {
            if new_seq <= existing_seq {
                Err(DhtError::sequence_not_monotonic())
            } else {
                Ok(())
            }
        }
        (Some(_), None) => Err(DhtError::new(
            ErrorCode::CasFail,
            "cannot replace a mutable value with an immutable one",
        )),
        _ => Ok(()),
    }
}

fn is_expired(persistent: bool, updated: i64, max_age: std::time::Duration) -> bool {
    if persistent {
        return false;
    }
    now() - updated >= max_age.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use boson_crypto::Keypair;

    #[tokio::test]
    async fn monotonic_write_then_cas_scenarios() {
        let store = Storage::new();
        let kp = Keypair::generate();
        let v_seq1 = Value::signed(&kp, b"one".to_vec()).unwrap();
        store.put_value(v_seq1.clone(), None, false, false).await.unwrap();

        // same sequence again must fail 302
        let err = store.put_value(v_seq1.clone(), None, false, false).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SequenceNotMonotonic);

        // next sequence succeeds
        let v_seq2 = v_seq1.update(&kp, b"two".to_vec()).unwrap();
        store.put_value(v_seq2.clone(), None, false, false).await.unwrap();
        let fetched = store.get_value(&kp.id()).await.unwrap();
        assert_eq!(fetched.sequence_number(), Some(1));
    }

    #[tokio::test]
    async fn cas_respects_expected_sequence() {
        let store = Storage::new();
        let kp = Keypair::generate();
        let v0 = Value::signed(&kp, b"zero".to_vec()).unwrap();
        store.put_value(v0.clone(), None, false, false).await.unwrap();
        let v1 = v0.update(&kp, b"one".to_vec()).unwrap();

        // stored sequence is 0; CAS against expected=5 must fail
        let err = store.put_value(v1.clone(), Some(5), false, false).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CasFail);

        // CAS against the correct expected=0 succeeds
        store.put_value(v1, Some(0), false, false).await.unwrap();
    }

    #[test]
    fn mutable_existing_value_rejects_an_immutable_replacement() {
        let kp = Keypair::generate();
        let existing = StoredValue {
            value: Value::signed(&kp, b"zero".to_vec()).unwrap(),
            persistent: false,
            created: 0,
            updated: 0,
            last_announce: 0,
        };
        let immutable = Value::immutable(b"unrelated".to_vec());
        let err = check_sequence(Some(&existing), None, &immutable).unwrap_err();
        assert_eq!(err.code, ErrorCode::CasFail);
    }

    #[tokio::test]
    async fn persistent_value_survives_expire_sweep() {
        let store = Storage::new();
        let kp = Keypair::generate();
        let v = Value::signed(&kp, b"x".to_vec()).unwrap();
        store.put_value(v.clone(), None, true, true).await.unwrap();
        store.expire().await;
        assert!(store.get_value(&kp.id()).await.is_some());
    }

    #[tokio::test]
    async fn peer_upsert_and_lookup_round_trip() {
        let store = Storage::new();
        let service = Id::random();
        let peer_kp = Keypair::generate();
        let peer = PeerInfo::create(&peer_kp, 0, "https://svc".into(), None, None).unwrap();
        store.put_peer(service, peer.clone(), false, true).await.unwrap();

        let fetched = store.get_peer(&service, &peer_kp.id()).await.unwrap();
        assert_eq!(fetched, peer);

        let many = store.get_peers(&service, 10).await;
        assert_eq!(many.len(), 1);
    }

    #[tokio::test]
    async fn invalid_peer_signature_is_rejected() {
        let store = Storage::new();
        let service = Id::random();
        let peer_kp = Keypair::generate();
        let mut peer = PeerInfo::create(&peer_kp, 0, "https://svc".into(), None, None).unwrap();
        peer.endpoint = "https://tampered".into();
        let err = store.put_peer(service, peer, false, true).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSignature);
    }
}
