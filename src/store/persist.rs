use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::record::KeyRecord;
use crate::error::{QkdError, QkdResult};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    keys: Vec<&'a KeyRecord>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    keys: Vec<KeyRecord>,
}

/// JSON snapshot of every key record, rewritten in full after each mutation.
///
/// Writes go to a sibling temporary file which is synced and then renamed
/// over the snapshot, so a crash leaves either the old or the new state.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all records. A missing file is an empty store.
    pub fn load(&self) -> QkdResult<HashMap<String, KeyRecord>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(QkdError::persistence_error(
                    "load",
                    &format!("{}: {}", self.path.display(), e),
                ))
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&data).map_err(|e| {
            QkdError::persistence_error("load", &format!("{}: {}", self.path.display(), e))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(QkdError::persistence_error(
                "load",
                &format!("unsupported snapshot version {}", snapshot.version),
            ));
        }

        let mut records = HashMap::with_capacity(snapshot.keys.len());
        for record in snapshot.keys {
            if record.cursor > record.material.len() {
                return Err(QkdError::persistence_error(
                    "load",
                    &format!("key {} has cursor past its material", record.key_id),
                ));
            }
            records.insert(record.key_id.clone(), record);
        }
        Ok(records)
    }

    pub fn write(&self, records: &HashMap<String, KeyRecord>) -> QkdResult<()> {
        let mut keys: Vec<&KeyRecord> = records.values().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key_id.cmp(&b.key_id)));
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            keys,
        };
        let data = serde_json::to_vec(&snapshot)
            .map_err(|e| QkdError::persistence_error("serialize", &e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        write().map_err(|e| {
            QkdError::persistence_error("write", &format!("{}: {}", self.path.display(), e))
        })
    }
}
