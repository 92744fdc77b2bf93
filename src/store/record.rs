use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// One quantum-simulated key held by the [`KeyStore`](super::KeyStore).
///
/// The material is fixed at creation. Only `cursor` and `uses` ever change,
/// and only together, through a sequential consume.
#[derive(Serialize, Deserialize)]
pub struct KeyRecord {
    pub(crate) key_id: String,
    pub(crate) client_id: String,
    pub(crate) peer_id: String,
    #[serde(with = "material_b64")]
    pub(crate) material: Vec<u8>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) cursor: usize,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) max_uses: Option<u64>,
    pub(crate) uses: u64,
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("length", &self.material.len())
            .field("cursor", &self.cursor)
            .field("uses", &self.uses)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

impl KeyRecord {
    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            key_id: self.key_id.clone(),
            client_id: self.client_id.clone(),
            peer_id: self.peer_id.clone(),
            length: self.material.len(),
            created_at: self.created_at,
            consumed: self.cursor,
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            uses: self.uses,
        }
    }

    pub fn remaining(&self) -> usize {
        self.material.len() - self.cursor
    }
}

/// Public view of a key record. Never carries material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    pub key_id: String,
    pub client_id: String,
    pub peer_id: String,
    pub length: usize,
    pub created_at: DateTime<Utc>,
    /// Sequential-consumption cursor
    pub consumed: usize,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<u64>,
    pub uses: u64,
}

impl KeyMetadata {
    pub fn is_exhausted(&self) -> bool {
        self.consumed == self.length
    }
}

/// Parameters of a key creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub client_id: String,
    pub peer_id: String,
    pub length: usize,
    pub expires_in: Option<std::time::Duration>,
    pub max_uses: Option<u64>,
}

impl KeyRequest {
    pub fn new(client_id: &str, peer_id: &str, length: usize) -> Self {
        Self {
            client_id: client_id.to_string(),
            peer_id: peer_id.to_string(),
            length,
            expires_in: None,
            max_uses: None,
        }
    }

    pub fn expires_in(mut self, ttl: std::time::Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn max_uses(mut self, max_uses: u64) -> Self {
        self.max_uses = Some(max_uses);
        self
    }
}

/// A freshly created key together with a copy of its full material
pub struct CreatedKey {
    pub metadata: KeyMetadata,
    pub material: Vec<u8>,
}

impl std::fmt::Debug for CreatedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedKey")
            .field("metadata", &self.metadata)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Result of a successful sequential consume.
///
/// `offset` is the cursor before the consume, so consecutive results for one
/// key tile its material without gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

mod material_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(material: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(material))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(encoded).map_err(serde::de::Error::custom)
    }
}
