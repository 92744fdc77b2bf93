use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::clock::{Clock, SystemClock};
use super::persist::SnapshotFile;
use super::record::{Consumption, CreatedKey, KeyMetadata, KeyRecord, KeyRequest};
use crate::error::{QkdError, QkdResult};

/// Authority over all key records.
///
/// Every creation and consume runs under one store-wide lock, including the
/// snapshot write when persistence is enabled, so no two callers can ever be
/// handed overlapping offset ranges of the same key.
pub struct KeyStore {
    records: Mutex<HashMap<String, KeyRecord>>,
    clock: Arc<dyn Clock>,
    snapshot: Option<SnapshotFile>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("snapshot", &self.snapshot.as_ref().map(|s| s.path().to_path_buf()))
            .finish()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl KeyStore {
    /// Volatile store; keys are lost on restart.
    pub fn in_memory() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            snapshot: None,
        }
    }

    /// Opens a persistent store backed by a JSON snapshot at `path`,
    /// loading any keys a previous run left behind.
    pub fn open(path: impl AsRef<Path>) -> QkdResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> QkdResult<Self> {
        let snapshot = SnapshotFile::new(path.as_ref());
        let records = snapshot.load()?;
        log::info!(
            "Loaded {} key(s) from {}",
            records.len(),
            snapshot.path().display()
        );
        Ok(Self {
            records: Mutex::new(records),
            clock,
            snapshot: Some(snapshot),
        })
    }

    /// Creates a key of `request.length` fresh random bytes.
    pub fn create(&self, request: KeyRequest) -> QkdResult<CreatedKey> {
        if request.length == 0 {
            return Err(QkdError::invalid_parameter("length", "a positive integer", "0"));
        }

        let now = self.clock.now();
        let expires_at = match request.expires_in {
            Some(ttl) if !ttl.is_zero() => {
                let overflow = || {
                    QkdError::invalid_parameter("expires_in", "a representable duration", "overflow")
                };
                let ttl = chrono::Duration::from_std(ttl).map_err(|_| overflow())?;
                Some(now.checked_add_signed(ttl).ok_or_else(overflow)?)
            }
            _ => None,
        };

        let mut material = vec![0u8; request.length];
        OsRng.fill_bytes(&mut material);

        let mut records = self.lock()?;
        let key_id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string();
            if !records.contains_key(&candidate) {
                break candidate;
            }
        };

        let record = KeyRecord {
            key_id: key_id.clone(),
            client_id: request.client_id,
            peer_id: request.peer_id,
            material: material.clone(),
            created_at: now,
            cursor: 0,
            expires_at,
            max_uses: request.max_uses,
            uses: 0,
        };
        let metadata = record.metadata();
        records.insert(key_id.clone(), record);

        if let Err(e) = self.persist(&records) {
            records.remove(&key_id);
            return Err(e);
        }

        log::debug!(
            "Created key key_id={} length={} expires_at={:?} max_uses={:?}",
            key_id,
            metadata.length,
            metadata.expires_at,
            metadata.max_uses
        );
        Ok(CreatedKey { metadata, material })
    }

    /// Metadata of a key; never reveals material.
    pub fn lookup(&self, key_id: &str) -> QkdResult<KeyMetadata> {
        let records = self.lock()?;
        records
            .get(key_id)
            .map(KeyRecord::metadata)
            .ok_or_else(|| QkdError::not_found(key_id))
    }

    /// Sequentially consumes the next `n` bytes of a key.
    ///
    /// Checks run in a fixed order (unknown id, expiry, use cap, remaining
    /// material). On any failure the record is left untouched.
    pub fn consume(&self, key_id: &str, n: usize) -> QkdResult<Consumption> {
        if n == 0 {
            return Err(QkdError::invalid_parameter("bytes", "a positive integer", "0"));
        }

        let now = self.clock.now();
        let mut records = self.lock()?;
        let record = records
            .get_mut(key_id)
            .ok_or_else(|| QkdError::not_found(key_id))?;

        if let Some(expires_at) = record.expires_at {
            if now > expires_at {
                return Err(QkdError::Expired {
                    key_id: key_id.to_string(),
                });
            }
        }
        if let Some(max_uses) = record.max_uses {
            if record.uses >= max_uses {
                return Err(QkdError::UsesExceeded {
                    key_id: key_id.to_string(),
                    max_uses,
                });
            }
        }
        let remaining = record.remaining();
        if n > remaining {
            return Err(QkdError::InsufficientMaterial {
                key_id: key_id.to_string(),
                requested: n,
                remaining,
            });
        }

        let offset = record.cursor;
        let bytes = record.material[offset..offset + n].to_vec();
        record.cursor += n;
        record.uses += 1;

        if let Err(e) = self.persist(&records) {
            if let Some(record) = records.get_mut(key_id) {
                record.cursor = offset;
                record.uses -= 1;
            }
            return Err(e);
        }

        log::debug!("Consumed key_id={} offset={} bytes={}", key_id, offset, n);
        Ok(Consumption { offset, bytes })
    }

    /// Non-consuming read of `material[offset..offset + n]`.
    ///
    /// Independent of the cursor: bytes returned here are not marked used and
    /// may already have been, or may later be, handed out by [`consume`].
    /// Callers that need one-time-pad freshness must not rely on it.
    ///
    /// [`consume`]: KeyStore::consume
    pub fn peek(&self, key_id: &str, offset: usize, n: usize) -> QkdResult<Vec<u8>> {
        let records = self.lock()?;
        let record = records
            .get(key_id)
            .ok_or_else(|| QkdError::not_found(key_id))?;

        let end = offset.checked_add(n);
        match end {
            Some(end) if n > 0 && end <= record.material.len() => {
                Ok(record.material[offset..end].to_vec())
            }
            _ => Err(QkdError::invalid_parameter(
                "range",
                &format!("0 < bytes and offset + bytes <= {}", record.material.len()),
                &format!("offset={} bytes={}", offset, n),
            )),
        }
    }

    /// Number of keys held. A poisoned lock still reports the records it guards.
    pub fn len(&self) -> usize {
        match self.records.lock() {
            Ok(records) => records.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self) -> bool {
        self.snapshot.is_some()
    }

    fn persist(&self, records: &HashMap<String, KeyRecord>) -> QkdResult<()> {
        match &self.snapshot {
            Some(snapshot) => snapshot.write(records),
            None => Ok(()),
        }
    }

    fn lock(&self) -> QkdResult<MutexGuard<'_, HashMap<String, KeyRecord>>> {
        self.records.lock().map_err(|_| QkdError::ServerFault {
            operation: "key_store".to_string(),
            status: 500,
            cause: "key store lock poisoned".to_string(),
        })
    }
}
