use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::QkdError;

/// Selectable protection level; 1 is the strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SecurityLevel {
    /// One-time pad over the key material
    OneTimePad = 1,
    /// AES-256-GCM under an HKDF-derived key
    Aead = 2,
    /// Same mechanism as level 2 under its own labels; reserved for a
    /// hybrid post-quantum derivation
    AeadReserved = 3,
    /// No confidentiality
    Plaintext = 4,
}

pub const ALGORITHM_OTP: &str = "OTP";
pub const ALGORITHM_AES_GCM: &str = "AES-256-GCM";
pub const ALGORITHM_PLAINTEXT: &str = "PLAINTEXT";

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 4] = [
        SecurityLevel::OneTimePad,
        SecurityLevel::Aead,
        SecurityLevel::AeadReserved,
        SecurityLevel::Plaintext,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn algorithm(self) -> &'static str {
        match self {
            SecurityLevel::OneTimePad => ALGORITHM_OTP,
            SecurityLevel::Aead | SecurityLevel::AeadReserved => ALGORITHM_AES_GCM,
            SecurityLevel::Plaintext => ALGORITHM_PLAINTEXT,
        }
    }

    pub fn requires_key(self) -> bool {
        self != SecurityLevel::Plaintext
    }

    pub fn is_aead(self) -> bool {
        matches!(self, SecurityLevel::Aead | SecurityLevel::AeadReserved)
    }
}

impl TryFrom<u8> for SecurityLevel {
    type Error = QkdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SecurityLevel::OneTimePad),
            2 => Ok(SecurityLevel::Aead),
            3 => Ok(SecurityLevel::AeadReserved),
            4 => Ok(SecurityLevel::Plaintext),
            other => Err(QkdError::UnsupportedLevel(other)),
        }
    }
}

impl From<SecurityLevel> for u8 {
    fn from(level: SecurityLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} ({})", self.as_u8(), self.algorithm())
    }
}
