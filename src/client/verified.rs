use std::fmt;
use zeroize::Zeroizing;

use crate::error::{QkdError, QkdResult};
use crate::integrity::IntegritySecret;

/// A KM result together with the key bytes it carried and the integrity
/// verdict for those bytes.
///
/// `tampered` is a warning, not an error: the caller receives the bytes as
/// they arrived and decides what to do with them.
pub struct Verified<T> {
    pub value: T,
    pub material: Zeroizing<Vec<u8>>,
    pub tampered: bool,
}

impl<T> Verified<T> {
    /// Decodes `encoded` and checks it against the server's digest of the
    /// original bytes.
    pub(crate) fn check(
        value: T,
        operation: &str,
        key_id: &str,
        encoded: &str,
        digest_hex: &str,
        secret: &IntegritySecret,
    ) -> QkdResult<Self> {
        let material = base64::decode(encoded).map_err(|e| {
            QkdError::protocol_failure(operation, &format!("invalid base64 material: {}", e))
        })?;
        let tampered = !secret.verify_hex(&material, digest_hex);
        if tampered {
            log::warn!(
                "Integrity mismatch on KM {}: key_id={} bytes={}",
                operation,
                key_id,
                material.len()
            );
        }
        Ok(Self {
            value,
            material: Zeroizing::new(material),
            tampered,
        })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Verified<U> {
        Verified {
            value: f(self.value),
            material: self.material,
            tampered: self.tampered,
        }
    }

    pub fn into_parts(self) -> (T, Zeroizing<Vec<u8>>, bool) {
        (self.value, self.material, self.tampered)
    }
}

impl<T: fmt::Debug> fmt::Debug for Verified<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verified")
            .field("value", &self.value)
            .field("material", &format_args!("<{} bytes>", self.material.len()))
            .field("tampered", &self.tampered)
            .finish()
    }
}
