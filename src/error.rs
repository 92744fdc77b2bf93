/*!
 * Error Handling for the QuMail Key Manager
 *
 * Provides one error type shared by the key store, the KM wire protocol,
 * the KM client and the tiered encryption engine, with numeric error codes,
 * user-friendly messages and the HTTP status each error maps to.
 */

use thiserror::Error;

/// Error type for all key manager and encryption operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QkdError {
    #[error("not found: {key_id}")]
    NotFound { key_id: String },

    #[error("key expired: {key_id}")]
    Expired { key_id: String },

    #[error("key usage exceeded: {key_id} ({max_uses} uses)")]
    UsesExceeded { key_id: String, max_uses: u64 },

    #[error("insufficient key material: {key_id} - requested {requested}, {remaining} remaining")]
    InsufficientMaterial {
        key_id: String,
        requested: usize,
        remaining: usize,
    },

    #[error("Invalid parameter: {parameter} - {expected} - got {actual}")]
    InvalidParameter {
        parameter: String,
        expected: String,
        actual: String,
    },

    #[error("Network failure: {operation} - {cause}")]
    NetworkFailure { operation: String, cause: String },

    #[error("KM server fault: {operation} - status {status} - {cause}")]
    ServerFault {
        operation: String,
        status: u16,
        cause: String,
    },

    #[error("Protocol failure: {operation} - {cause}")]
    ProtocolFailure { operation: String, cause: String },

    #[error("Security level {level} requires key material")]
    MissingKeyMaterial { level: u8 },

    #[error("Key too short for level {level}: need {required} bytes, got {actual}")]
    KeyTooShort {
        level: u8,
        required: usize,
        actual: usize,
    },

    #[error("Authentication failed for level {level} ciphertext")]
    AuthenticationFailure { level: u8 },

    #[error("Insufficient metadata for decryption: missing or invalid {field}")]
    InsufficientMetadata { field: String },

    #[error("Unsupported security level: {0}")]
    UnsupportedLevel(u8),

    #[error("Cryptographic operation failed: {operation} - {cause}")]
    CryptoFailure { operation: String, cause: String },

    #[error("Key cache error: {operation} - {cause}")]
    KeyCacheError { operation: String, cause: String },

    #[error("Persistence error: {operation} - {cause}")]
    PersistenceError { operation: String, cause: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Error code constants for different error categories
pub mod error_codes {
    // Key store errors: 1000-1999
    pub const KEY_NOT_FOUND: u32 = 1001;
    pub const KEY_EXPIRED: u32 = 1002;
    pub const KEY_USES_EXCEEDED: u32 = 1003;
    pub const KEY_INSUFFICIENT_MATERIAL: u32 = 1004;
    pub const KEY_PERSISTENCE_FAILED: u32 = 1005;

    // KM client / transport errors: 2000-2999
    pub const KM_NETWORK_FAILURE: u32 = 2001;
    pub const KM_SERVER_FAULT: u32 = 2002;
    pub const KM_PROTOCOL_FAILURE: u32 = 2003;

    // Engine errors: 3000-3999
    pub const ENGINE_MISSING_KEY_MATERIAL: u32 = 3001;
    pub const ENGINE_KEY_TOO_SHORT: u32 = 3002;
    pub const ENGINE_AUTHENTICATION_FAILED: u32 = 3003;
    pub const ENGINE_INSUFFICIENT_METADATA: u32 = 3004;
    pub const ENGINE_UNSUPPORTED_LEVEL: u32 = 3005;
    pub const ENGINE_CRYPTO_FAILURE: u32 = 3006;

    // Key cache errors: 4000-4999
    pub const KEY_CACHE_FAILED: u32 = 4001;

    // Generic errors: 9000-9999
    pub const CONFIG_INVALID: u32 = 9001;
    pub const SERIALIZATION_FAILED: u32 = 9002;
    pub const IO_ERROR: u32 = 9003;
    pub const INVALID_PARAMETER: u32 = 9999;
}

impl QkdError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            QkdError::NotFound { .. } => error_codes::KEY_NOT_FOUND,
            QkdError::Expired { .. } => error_codes::KEY_EXPIRED,
            QkdError::UsesExceeded { .. } => error_codes::KEY_USES_EXCEEDED,
            QkdError::InsufficientMaterial { .. } => error_codes::KEY_INSUFFICIENT_MATERIAL,
            QkdError::InvalidParameter { .. } => error_codes::INVALID_PARAMETER,
            QkdError::NetworkFailure { .. } => error_codes::KM_NETWORK_FAILURE,
            QkdError::ServerFault { .. } => error_codes::KM_SERVER_FAULT,
            QkdError::ProtocolFailure { .. } => error_codes::KM_PROTOCOL_FAILURE,
            QkdError::MissingKeyMaterial { .. } => error_codes::ENGINE_MISSING_KEY_MATERIAL,
            QkdError::KeyTooShort { .. } => error_codes::ENGINE_KEY_TOO_SHORT,
            QkdError::AuthenticationFailure { .. } => error_codes::ENGINE_AUTHENTICATION_FAILED,
            QkdError::InsufficientMetadata { .. } => error_codes::ENGINE_INSUFFICIENT_METADATA,
            QkdError::UnsupportedLevel(_) => error_codes::ENGINE_UNSUPPORTED_LEVEL,
            QkdError::CryptoFailure { .. } => error_codes::ENGINE_CRYPTO_FAILURE,
            QkdError::KeyCacheError { .. } => error_codes::KEY_CACHE_FAILED,
            QkdError::PersistenceError { .. } => error_codes::KEY_PERSISTENCE_FAILED,
            QkdError::ConfigError(_) => error_codes::CONFIG_INVALID,
            QkdError::SerializationError(_) => error_codes::SERIALIZATION_FAILED,
            QkdError::IoError(_) => error_codes::IO_ERROR,
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            QkdError::NotFound { .. } => "NotFound",
            QkdError::Expired { .. } => "Expired",
            QkdError::UsesExceeded { .. } => "UsesExceeded",
            QkdError::InsufficientMaterial { .. } => "InsufficientMaterial",
            QkdError::InvalidParameter { .. } => "InvalidParameter",
            QkdError::NetworkFailure { .. } => "NetworkFailure",
            QkdError::ServerFault { .. } => "ServerFault",
            QkdError::ProtocolFailure { .. } => "ProtocolFailure",
            QkdError::MissingKeyMaterial { .. } => "MissingKeyMaterial",
            QkdError::KeyTooShort { .. } => "KeyTooShort",
            QkdError::AuthenticationFailure { .. } => "AuthenticationFailure",
            QkdError::InsufficientMetadata { .. } => "InsufficientMetadata",
            QkdError::UnsupportedLevel(_) => "UnsupportedLevel",
            QkdError::CryptoFailure { .. } => "CryptoFailure",
            QkdError::KeyCacheError { .. } => "KeyCacheError",
            QkdError::PersistenceError { .. } => "PersistenceError",
            QkdError::ConfigError(_) => "ConfigError",
            QkdError::SerializationError(_) => "SerializationError",
            QkdError::IoError(_) => "IoError",
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            QkdError::NotFound { key_id } => {
                format!("The key manager does not know key '{}'.", key_id)
            }
            QkdError::Expired { key_id } => {
                format!("Key '{}' has expired and can no longer be used.", key_id)
            }
            QkdError::UsesExceeded { key_id, .. } => {
                format!("Key '{}' has reached its usage limit.", key_id)
            }
            QkdError::InsufficientMaterial { key_id, .. } => format!(
                "Key '{}' does not have enough unused material left. Request a new key.",
                key_id
            ),
            QkdError::InvalidParameter { parameter, expected, .. } => {
                format!("Invalid parameter '{}'. Expected {}.", parameter, expected)
            }
            QkdError::NetworkFailure { .. } => {
                "The key manager could not be reached. Check the KM address and network."
                    .to_string()
            }
            QkdError::ServerFault { .. } => {
                "The key manager reported an internal error. Try again later.".to_string()
            }
            QkdError::ProtocolFailure { .. } => {
                "The key manager sent a malformed response.".to_string()
            }
            QkdError::MissingKeyMaterial { level } => {
                format!("Security level {} needs quantum key material.", level)
            }
            QkdError::KeyTooShort { level, .. } => format!(
                "The key material is too short for security level {}.",
                level
            ),
            QkdError::AuthenticationFailure { .. } => {
                "The message failed authentication. It may have been tampered with.".to_string()
            }
            QkdError::InsufficientMetadata { .. } => {
                "The message is missing the information needed to decrypt it.".to_string()
            }
            QkdError::UnsupportedLevel(level) => {
                format!("Security level {} is not supported (use 1-4).", level)
            }
            QkdError::CryptoFailure { operation, .. } => {
                format!("Cryptographic operation '{}' failed.", operation)
            }
            QkdError::KeyCacheError { .. } => {
                "The local key cache could not be used.".to_string()
            }
            QkdError::PersistenceError { .. } => {
                "The key store could not be saved. Check file permissions and disk space."
                    .to_string()
            }
            QkdError::ConfigError(_) => "The configuration is invalid.".to_string(),
            QkdError::SerializationError(_) => {
                "Data serialization failed. Data format may be corrupted.".to_string()
            }
            QkdError::IoError(_) => {
                "Input/output operation failed. Check file permissions and disk space.".to_string()
            }
        }
    }

    /// Whether a KM call that failed with this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QkdError::NetworkFailure { .. } | QkdError::ServerFault { .. }
        )
    }

    /// HTTP status code the KM server answers with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            QkdError::NotFound { .. } => 404,
            QkdError::Expired { .. }
            | QkdError::UsesExceeded { .. }
            | QkdError::InsufficientMaterial { .. }
            | QkdError::InvalidParameter { .. } => 400,
            _ => 500,
        }
    }
}

/// Convenience constructors for common error types
impl QkdError {
    pub fn not_found(key_id: &str) -> Self {
        QkdError::NotFound {
            key_id: key_id.to_string(),
        }
    }

    pub fn invalid_parameter(parameter: &str, expected: &str, actual: &str) -> Self {
        QkdError::InvalidParameter {
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn network_failure(operation: &str, cause: &str) -> Self {
        QkdError::NetworkFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn protocol_failure(operation: &str, cause: &str) -> Self {
        QkdError::ProtocolFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn crypto_failure(operation: &str, cause: &str) -> Self {
        QkdError::CryptoFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn key_cache_error(operation: &str, cause: &str) -> Self {
        QkdError::KeyCacheError {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn persistence_error(operation: &str, cause: &str) -> Self {
        QkdError::PersistenceError {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn insufficient_metadata(field: &str) -> Self {
        QkdError::InsufficientMetadata {
            field: field.to_string(),
        }
    }
}

// From implementations for automatic error conversion
impl From<std::io::Error> for QkdError {
    fn from(err: std::io::Error) -> Self {
        QkdError::IoError(format!("IO operation failed: {}", err))
    }
}

impl From<serde_json::Error> for QkdError {
    fn from(err: serde_json::Error) -> Self {
        QkdError::SerializationError(err.to_string())
    }
}

impl From<figment::Error> for QkdError {
    fn from(err: figment::Error) -> Self {
        QkdError::ConfigError(format!("config extraction failed: {}", err))
    }
}

/// Result type alias for key manager operations
pub type QkdResult<T> = Result<T, QkdError>;
