//! Versioned on-disk snapshot of the storage tables, written atomically
//! (temp file + rename) — teacher precedent: `DhtStorage::save_to_file` /
//! `atomic_write_sync` / `atomic_write_async` in `lib-storage::dht::storage`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::STORAGE_SNAPSHOT_VERSION;
use crate::record::{PeerKey, StoredPeer, StoredValue};
use boson_proto::Id;

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    /// Sorted by id for deterministic serialization.
    pub values: Vec<(Id, StoredValue)>,
    pub peers: Vec<(PeerKey, StoredPeer)>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encode(String),
    #[error("snapshot schema version {found} is incompatible with {expected}; recreating")]
    VersionMismatch { found: u32, expected: u32 },
}

fn atomic_write_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("snapshot path has no parent dir"))?;
    std::fs::create_dir_all(dir)?;
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Ok(d) = std::fs::File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

pub async fn save(path: PathBuf, snapshot: SnapshotFile) -> Result<(), SnapshotError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(&snapshot, &mut bytes).map_err(|e| SnapshotError::Encode(e.to_string()))?;
    tokio::task::spawn_blocking(move || atomic_write_sync(&path, &bytes))
        .await
        .map_err(|e| SnapshotError::Io(std::io::Error::other(e.to_string())))??;
    Ok(())
}

pub async fn load(path: PathBuf) -> Result<Option<SnapshotFile>, SnapshotError> {
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: SnapshotFile =
        ciborium::from_reader(bytes.as_slice()).map_err(|e| SnapshotError::Encode(e.to_string()))?;
    if snapshot.version != STORAGE_SNAPSHOT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            found: snapshot.version,
            expected: STORAGE_SNAPSHOT_VERSION,
        });
    }
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boson.snapshot");
        let snapshot = SnapshotFile {
            version: STORAGE_SNAPSHOT_VERSION,
            values: vec![],
            peers: vec![],
        };
        save(path.clone(), snapshot).await.unwrap();
        let loaded = load(path).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn snapshot_with_a_real_signed_value_round_trips() {
        use boson_crypto::Keypair;
        use boson_proto::Value;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boson.snapshot");
        let kp = Keypair::generate();
        let value = Value::signed(&kp, b"persisted".to_vec()).unwrap();
        let id = value.id();
        let row = StoredValue {
            value,
            persistent: true,
            created: 1,
            updated: 2,
            last_announce: 3,
        };
        let snapshot = SnapshotFile {
            version: STORAGE_SNAPSHOT_VERSION,
            values: vec![(id, row)],
            peers: vec![],
        };
        save(path.clone(), snapshot).await.unwrap();
        let loaded = load(path).await.unwrap().unwrap();
        assert_eq!(loaded.values.len(), 1);
        assert_eq!(loaded.values[0].0, id);
        assert!(loaded.values[0].1.value.is_valid());
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.snapshot");
        assert!(load(path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boson.snapshot");
        let snapshot = SnapshotFile {
            version: STORAGE_SNAPSHOT_VERSION - 1,
            values: vec![],
            peers: vec![],
        };
        save(path.clone(), snapshot).await.unwrap();
        let err = load(path).await.unwrap_err();
        assert!(matches!(err, SnapshotError::VersionMismatch { .. }));
    }
}
