/*!
 * KM wire contract
 *
 * Explicit request/response records for every KM route. Binary fields travel
 * base64-encoded, digests as lowercase hex HMAC-SHA256 over the raw bytes
 * before encoding, timestamps as integer Unix seconds.
 */

use serde::{Deserialize, Serialize};

use crate::error::QkdError;
use crate::store::{CreatedKey, KeyMetadata};

pub const STATUS_PATH: &str = "/api/v1/status";
pub const KEYS_PATH: &str = "/api/v1/keys";
pub const KEYS_NEW_PATH: &str = "/api/v1/keys/new";
pub const CONSUME_PATH: &str = "/api/v1/consume";
pub const MATERIAL_PATH: &str = "/api/v1/material";
pub const INTRUSION_PATH: &str = "/api/v1/admin/intrusion";

pub const DEFAULT_CLIENT_ID: &str = "client";
pub const DEFAULT_PEER_ID: &str = "peer";
pub const DEFAULT_KEY_LENGTH: usize = 4096;

/// Error messages carried in [`ErrorBody`]
pub mod messages {
    pub const NOT_FOUND: &str = "not found";
    pub const EXPIRED: &str = "key expired";
    pub const USES_EXCEEDED: &str = "key usage exceeded";
    pub const INSUFFICIENT_MATERIAL: &str = "insufficient key material";
    pub const INVALID_BYTES: &str = "invalid bytes";
    pub const INVALID_LENGTH: &str = "invalid length";
    pub const INVALID_PARAMS: &str = "invalid params";
    pub const RANGE_OUT_OF_BOUNDS: &str = "range out of bounds";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub intrusion: bool,
}

impl StatusResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Seconds until expiry; zero means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u64>,
}

impl CreateKeyRequest {
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID)
    }

    pub fn peer_id(&self) -> &str {
        self.peer_id.as_deref().unwrap_or(DEFAULT_PEER_ID)
    }

    pub fn length(&self) -> usize {
        self.length.unwrap_or(DEFAULT_KEY_LENGTH)
    }
}

/// Key metadata as returned by `GET /api/v1/keys/{key_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub client_id: String,
    pub peer_id: String,
    pub length: usize,
    pub created_at: i64,
    pub consumed: usize,
    pub expires_at: Option<i64>,
    pub max_uses: Option<u64>,
    pub uses: u64,
}

impl From<&KeyMetadata> for KeyInfo {
    fn from(meta: &KeyMetadata) -> Self {
        Self {
            key_id: meta.key_id.clone(),
            client_id: meta.client_id.clone(),
            peer_id: meta.peer_id.clone(),
            length: meta.length,
            created_at: meta.created_at.timestamp(),
            consumed: meta.consumed,
            expires_at: meta.expires_at.map(|t| t.timestamp()),
            max_uses: meta.max_uses,
            uses: meta.uses,
        }
    }
}

/// Response to key creation: metadata plus the full material and its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCreatedResponse {
    #[serde(flatten)]
    pub info: KeyInfo,
    pub key_b64: String,
    pub key_hmac: String,
}

impl KeyCreatedResponse {
    /// `sent` are the bytes actually placed on the wire, `digest` was
    /// computed over the original material.
    pub fn new(created: &CreatedKey, sent: &[u8], digest: String) -> Self {
        Self {
            info: KeyInfo::from(&created.metadata),
            key_b64: base64::encode(sent),
            key_hmac: digest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialQuery {
    pub offset: usize,
    pub bytes: usize,
}

/// Response to a consume or a material peek
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceResponse {
    pub offset: usize,
    pub bytes: usize,
    pub slice_b64: String,
    pub slice_hmac: String,
}

impl SliceResponse {
    pub fn new(offset: usize, sent: &[u8], digest: String) -> Self {
        Self {
            offset,
            bytes: sent.len(),
            slice_b64: base64::encode(sent),
            slice_hmac: digest,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrusionToggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrusionState {
    pub intrusion: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Wire message for a key store error
    pub fn from_error(err: &QkdError) -> Self {
        let message = match err {
            QkdError::NotFound { .. } => messages::NOT_FOUND.to_string(),
            QkdError::Expired { .. } => messages::EXPIRED.to_string(),
            QkdError::UsesExceeded { .. } => messages::USES_EXCEEDED.to_string(),
            QkdError::InsufficientMaterial { .. } => messages::INSUFFICIENT_MATERIAL.to_string(),
            other => other.to_string(),
        };
        Self::new(message)
    }

    /// Maps an error response back onto the error taxonomy
    pub fn into_error(self, status: u16, operation: &str, key_id: Option<&str>) -> QkdError {
        let key_id = key_id.unwrap_or_default().to_string();
        match (status, self.error.as_str()) {
            (404, _) => QkdError::NotFound { key_id },
            (400, messages::EXPIRED) => QkdError::Expired { key_id },
            (400, messages::USES_EXCEEDED) => QkdError::UsesExceeded {
                key_id,
                max_uses: 0,
            },
            (400, messages::INSUFFICIENT_MATERIAL) => QkdError::InsufficientMaterial {
                key_id,
                requested: 0,
                remaining: 0,
            },
            (400..=499, message) => {
                QkdError::invalid_parameter(operation, "a valid request", message)
            }
            (500..=599, message) => QkdError::ServerFault {
                operation: operation.to_string(),
                status,
                cause: message.to_string(),
            },
            (_, message) => QkdError::protocol_failure(
                operation,
                &format!("unexpected status {}: {}", status, message),
            ),
        }
    }
}
