/*!
 * Local key cache
 *
 * A `key_id -> material` map used as a fallback source of key material when
 * the KM is unreachable. [`EncryptedFileKeyCache`] keeps the map on disk as
 * a single AES-256-GCM blob under an Argon2id password-derived key, with a
 * fresh salt and nonce on every write.
 */

use argon2::{Argon2, ParamsBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::{Zeroize, Zeroizing};

use crate::engine::{AesGcm, NONCE_LEN};
use crate::error::{QkdError, QkdResult};

/// Associated data bound to every cache blob
pub const CACHE_AAD: &[u8] = b"qumail-key-cache";
pub const CACHE_SALT_LEN: usize = 16;

/// Map-like key cache contract
pub trait KeyCache: Send + Sync {
    fn put(&self, key_id: &str, material: &[u8]) -> QkdResult<()>;

    fn get(&self, key_id: &str) -> Option<Zeroizing<Vec<u8>>>;
}

/// Cache that lives only as long as the process
#[derive(Default)]
pub struct MemoryKeyCache {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyCache for MemoryKeyCache {
    fn put(&self, key_id: &str, material: &[u8]) -> QkdResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QkdError::key_cache_error("put", "cache lock poisoned"))?;
        entries.insert(key_id.to_string(), Zeroizing::new(material.to_vec()));
        Ok(())
    }

    fn get(&self, key_id: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.entries.lock().ok()?.get(key_id).cloned()
    }
}

/// Argon2id cost parameters for the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKdfParams {
    /// Memory cost (in KB)
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for CacheKdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 19456, // 19 MB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl CacheKdfParams {
    fn derive(&self, password: &[u8], salt: &[u8]) -> QkdResult<Zeroizing<[u8; 32]>> {
        let mut builder = ParamsBuilder::new();
        builder
            .m_cost(self.memory_cost)
            .t_cost(self.time_cost)
            .p_cost(self.parallelism)
            .output_len(32);
        let params = builder.build().map_err(|e| {
            QkdError::key_cache_error("derive", &format!("invalid Argon2 parameters: {}", e))
        })?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(password, salt, &mut key[..])
            .map_err(|e| QkdError::key_cache_error("derive", &e.to_string()))?;
        Ok(key)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    salt: String,
    nonce: String,
    blob: String,
}

/// Password-encrypted file cache.
///
/// A missing, unreadable or wrong-password file yields an empty cache and a
/// warning; the next `put` overwrites it.
pub struct EncryptedFileKeyCache {
    path: PathBuf,
    password: Zeroizing<String>,
    params: CacheKdfParams,
    /// key_id -> base64 material
    entries: Mutex<HashMap<String, String>>,
}

impl EncryptedFileKeyCache {
    pub fn open(path: impl Into<PathBuf>, password: &str) -> Self {
        Self::open_with_params(path, password, CacheKdfParams::default())
    }

    pub fn open_with_params(path: impl Into<PathBuf>, password: &str, params: CacheKdfParams) -> Self {
        let path = path.into();
        let password = Zeroizing::new(password.to_string());
        let entries = match load(&path, password.as_bytes(), &params) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable key cache {}: {}",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        };
        Self {
            path,
            password,
            params,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &HashMap<String, String>) -> QkdResult<()> {
        let mut salt = [0u8; CACHE_SALT_LEN];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
        let key = self.params.derive(self.password.as_bytes(), &salt)?;
        let cipher = AesGcm::new(&key[..])?;
        let nonce = AesGcm::generate_nonce();

        let plaintext = Zeroizing::new(serde_json::to_vec(entries)?);
        let blob = cipher.encrypt(&plaintext, &nonce, CACHE_AAD)?;
        let file = CacheFile {
            salt: base64::encode(salt),
            nonce: base64::encode(nonce),
            blob: base64::encode(blob),
        };

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                QkdError::key_cache_error(
                    "persist",
                    &format!("failed to write {}: {}", self.path.display(), e),
                )
            })
    }
}

fn load(path: &Path, password: &[u8], params: &CacheKdfParams) -> QkdResult<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read(path)?;
    let file: CacheFile = serde_json::from_slice(&raw)?;
    let decode = |field: &str, value: &str| {
        base64::decode(value)
            .map_err(|e| QkdError::key_cache_error("load", &format!("invalid {}: {}", field, e)))
    };
    let salt = decode("salt", &file.salt)?;
    let nonce = decode("nonce", &file.nonce)?;
    let blob = decode("blob", &file.blob)?;
    if nonce.len() != NONCE_LEN {
        return Err(QkdError::key_cache_error("load", "invalid nonce length"));
    }

    let key = params.derive(password, &salt)?;
    let cipher = AesGcm::new(&key[..])?;
    let plaintext = cipher
        .decrypt(&blob, &nonce, CACHE_AAD)
        .map(Zeroizing::new)
        .map_err(|_| QkdError::key_cache_error("load", "wrong password or corrupted cache"))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

impl KeyCache for EncryptedFileKeyCache {
    /// Stores `material` and rewrites the file. The in-memory copy is kept
    /// even when the write fails.
    fn put(&self, key_id: &str, material: &[u8]) -> QkdResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QkdError::key_cache_error("put", "cache lock poisoned"))?;
        entries.insert(key_id.to_string(), base64::encode(material));
        self.persist(&entries)
    }

    fn get(&self, key_id: &str) -> Option<Zeroizing<Vec<u8>>> {
        let entries = self.entries.lock().ok()?;
        let encoded = entries.get(key_id)?;
        base64::decode(encoded).ok().map(Zeroizing::new)
    }
}

impl Drop for EncryptedFileKeyCache {
    fn drop(&mut self) {
        if let Ok(entries) = self.entries.get_mut() {
            for value in entries.values_mut() {
                value.zeroize();
            }
        }
    }
}

impl std::fmt::Debug for EncryptedFileKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileKeyCache")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cheap() -> CacheKdfParams {
        CacheKdfParams {
            memory_cost: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_memory_cache_put_get() {
        let cache = MemoryKeyCache::new();
        assert!(cache.get("k").is_none());
        cache.put("k", &[1, 2, 3]).unwrap();
        assert_eq!(cache.get("k").unwrap()[..], [1, 2, 3]);
        cache.put("k", &[4]).unwrap();
        assert_eq!(cache.get("k").unwrap()[..], [4]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let cache = std::sync::Arc::new(MemoryKeyCache::new());
        cache.put("a", &[1]).unwrap();
        cache.put("b", &[2]).unwrap();

        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();

        assert_eq!(cache.len(), 2);
        assert!(!cache.is_empty());
        assert!(cache.put("c", &[3]).is_err());
    }

    #[test]
    fn test_file_cache_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = EncryptedFileKeyCache::open_with_params(&path, "pw", cheap());
        assert!(cache.is_empty());
        cache.put("key-a", &[9; 40]).unwrap();
        cache.put("key-b", b"bytes").unwrap();
        drop(cache);

        let raw = fs::read_to_string(&path).unwrap();
        let file: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(file.get("salt").is_some());
        assert!(file.get("nonce").is_some());
        assert!(!raw.contains("key-a"));

        let reopened = EncryptedFileKeyCache::open_with_params(&path, "pw", cheap());
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("key-a").unwrap()[..], [9; 40]);
        assert_eq!(reopened.get("key-b").unwrap()[..], b"bytes"[..]);
        assert!(reopened.get("key-c").is_none());
    }

    #[test]
    fn test_wrong_password_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        EncryptedFileKeyCache::open_with_params(&path, "right", cheap())
            .put("k", &[1])
            .unwrap();

        let cache = EncryptedFileKeyCache::open_with_params(&path, "wrong", cheap());
        assert!(cache.is_empty());
        assert!(load(&path, b"wrong", &cheap()).is_err());
    }

    #[test]
    fn test_corrupt_file_starts_empty_and_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "not json").unwrap();

        let cache = EncryptedFileKeyCache::open_with_params(&path, "pw", cheap());
        assert!(cache.is_empty());
        cache.put("k", &[7, 7]).unwrap();

        let reopened = EncryptedFileKeyCache::open_with_params(&path, "pw", cheap());
        assert_eq!(reopened.get("k").unwrap()[..], [7, 7]);
    }

    #[test]
    fn test_each_write_uses_fresh_salt_and_nonce() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = EncryptedFileKeyCache::open_with_params(&path, "pw", cheap());

        cache.put("k", &[1]).unwrap();
        let first: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        cache.put("k", &[1]).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_ne!(first["salt"], second["salt"]);
        assert_ne!(first["nonce"], second["nonce"]);
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("cache.json");
        let cache = EncryptedFileKeyCache::open_with_params(&path, "pw", cheap());
        assert!(matches!(
            cache.put("k", &[1]),
            Err(QkdError::KeyCacheError { .. })
        ));
        assert_eq!(cache.get("k").unwrap()[..], [1]);
    }
}
