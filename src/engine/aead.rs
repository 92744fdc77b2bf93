use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::level::SecurityLevel;
use crate::error::{QkdError, QkdResult};

/// Bytes of key material consumed by levels 2 and 3
pub const AEAD_KEY_MATERIAL_LEN: usize = 64;
pub const AES_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// HKDF info label binding the derived key to its level
pub fn derivation_label(level: SecurityLevel) -> &'static [u8] {
    match level {
        SecurityLevel::AeadReserved => b"qumail-level3-aes-key",
        _ => b"qumail-level2-aes-key",
    }
}

/// Associated-data tag recorded with every level 2/3 ciphertext
pub fn aad_tag(level: SecurityLevel) -> &'static str {
    match level {
        SecurityLevel::AeadReserved => "qumail-level3",
        _ => "qumail-level2",
    }
}

/// Derives the AES-256 key for `level` from the leading
/// [`AEAD_KEY_MATERIAL_LEN`] bytes of `material`.
pub fn derive_key(level: SecurityLevel, material: &[u8]) -> QkdResult<Zeroizing<[u8; AES_KEY_LEN]>> {
    if material.len() < AEAD_KEY_MATERIAL_LEN {
        return Err(QkdError::KeyTooShort {
            level: level.as_u8(),
            required: AEAD_KEY_MATERIAL_LEN,
            actual: material.len(),
        });
    }
    let hk = Hkdf::<Sha256>::new(None, &material[..AEAD_KEY_MATERIAL_LEN]);
    let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
    hk.expand(derivation_label(level), &mut key[..])
        .map_err(|e| QkdError::crypto_failure("key derivation", &e.to_string()))?;
    Ok(key)
}

/// AES-256-GCM with a 96-bit nonce and the tag appended to the ciphertext
pub struct AesGcm {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcm")
            .field("cipher", &"[AES-256-GCM Cipher]")
            .finish()
    }
}

impl AesGcm {
    pub fn new(key: &[u8]) -> QkdResult<Self> {
        if key.len() != AES_KEY_LEN {
            return Err(QkdError::invalid_parameter(
                "key",
                "32 bytes",
                &format!("{} bytes", key.len()),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&Aes256Gcm::generate_nonce(&mut OsRng));
        nonce
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8], aad: &[u8]) -> QkdResult<Vec<u8>> {
        let nonce = checked_nonce(nonce)?;
        self.cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| QkdError::crypto_failure("AES-GCM encryption", &e.to_string()))
    }

    /// Fails when the ciphertext, tag, nonce or associated data do not
    /// match; never returns unauthenticated output.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8], aad: &[u8]) -> QkdResult<Vec<u8>> {
        let nonce = checked_nonce(nonce)?;
        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| QkdError::crypto_failure("AES-GCM decryption", "authentication failed"))
    }
}

fn checked_nonce(nonce: &[u8]) -> QkdResult<&Nonce<<Aes256Gcm as AeadCore>::NonceSize>> {
    if nonce.len() != NONCE_LEN {
        return Err(QkdError::insufficient_metadata("nonce_b64"));
    }
    Ok(Nonce::from_slice(nonce))
}
