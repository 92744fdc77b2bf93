/*!
 * Tiered encryption engine
 *
 * Stateless encrypt/decrypt selected by security level:
 *
 * - Level 1: one-time pad over the key material
 * - Levels 2 and 3: AES-256-GCM under a key derived with HKDF-SHA256 from
 *   64 bytes of key material, random 96-bit nonce, level-specific
 *   associated data
 * - Level 4: passthrough
 *
 * Everything needed to decrypt besides the key travels in [`CipherMetadata`].
 */

mod aead;
mod level;
mod otp;
mod plan;

pub use aead::{aad_tag, derivation_label, derive_key, AesGcm, AEAD_KEY_MATERIAL_LEN, NONCE_LEN};
pub use level::{SecurityLevel, ALGORITHM_AES_GCM, ALGORITHM_OTP, ALGORITHM_PLAINTEXT};
pub use otp::xor_with_key;
pub use plan::KeyPlan;

use serde::{Deserialize, Serialize};

use crate::error::{QkdError, QkdResult};

/// Decryption metadata carried alongside each ciphertext
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad: Option<String>,
}

/// Output of [`encrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub algorithm: String,
    pub ciphertext: Vec<u8>,
    pub metadata: CipherMetadata,
}

fn required_key(level: SecurityLevel, key: Option<&[u8]>) -> QkdResult<&[u8]> {
    key.ok_or(QkdError::MissingKeyMaterial {
        level: level.as_u8(),
    })
}

pub fn encrypt(level: SecurityLevel, plaintext: &[u8], key: Option<&[u8]>) -> QkdResult<Sealed> {
    match level {
        SecurityLevel::Plaintext => Ok(Sealed {
            algorithm: level.algorithm().to_string(),
            ciphertext: plaintext.to_vec(),
            metadata: CipherMetadata::default(),
        }),
        SecurityLevel::OneTimePad => {
            let key = required_key(level, key)?;
            Ok(Sealed {
                algorithm: level.algorithm().to_string(),
                ciphertext: xor_with_key(plaintext, key)?,
                metadata: CipherMetadata {
                    otp_bytes: Some(plaintext.len()),
                    ..Default::default()
                },
            })
        }
        SecurityLevel::Aead | SecurityLevel::AeadReserved => {
            let material = required_key(level, key)?;
            let aes_key = derive_key(level, material)?;
            let cipher = AesGcm::new(&aes_key[..])?;
            let nonce = AesGcm::generate_nonce();
            let aad = aad_tag(level);
            let ciphertext = cipher.encrypt(plaintext, &nonce, aad.as_bytes())?;
            Ok(Sealed {
                algorithm: level.algorithm().to_string(),
                ciphertext,
                metadata: CipherMetadata {
                    nonce_b64: Some(base64::encode(nonce)),
                    aad: Some(aad.to_string()),
                    ..Default::default()
                },
            })
        }
    }
}

/// Reverses [`encrypt`]. The metadata must be handed back as produced;
/// a missing or unreadable nonce or tag is `InsufficientMetadata`.
pub fn decrypt(level: SecurityLevel, sealed: &Sealed, key: Option<&[u8]>) -> QkdResult<Vec<u8>> {
    if sealed.algorithm != level.algorithm() {
        return Err(QkdError::insufficient_metadata("algorithm"));
    }
    match level {
        SecurityLevel::Plaintext => Ok(sealed.ciphertext.clone()),
        SecurityLevel::OneTimePad => {
            let key = required_key(level, key)?;
            xor_with_key(&sealed.ciphertext, key)
        }
        SecurityLevel::Aead | SecurityLevel::AeadReserved => {
            let material = required_key(level, key)?;
            let nonce = sealed
                .metadata
                .nonce_b64
                .as_deref()
                .and_then(|n| base64::decode(n).ok())
                .filter(|n| n.len() == NONCE_LEN)
                .ok_or_else(|| QkdError::insufficient_metadata("nonce_b64"))?;
            let aad = sealed
                .metadata
                .aad
                .as_deref()
                .ok_or_else(|| QkdError::insufficient_metadata("aad"))?;
            let aes_key = derive_key(level, material)?;
            let cipher = AesGcm::new(&aes_key[..])?;
            cipher
                .decrypt(&sealed.ciphertext, &nonce, aad.as_bytes())
                .map_err(|err| match err {
                    QkdError::CryptoFailure { .. } => QkdError::AuthenticationFailure {
                        level: level.as_u8(),
                    },
                    other => other,
                })
        }
    }
}

#[cfg(test)]
mod tests;
