use crate::error::{QkdError, QkdResult};

/// XORs `data` with the leading `data.len()` bytes of `key`.
///
/// Encryption and decryption are the same operation. There is no integrity
/// check: a wrong key yields wrong output, not an error.
pub fn xor_with_key(data: &[u8], key: &[u8]) -> QkdResult<Vec<u8>> {
    if key.len() < data.len() {
        return Err(QkdError::KeyTooShort {
            level: 1,
            required: data.len(),
            actual: key.len(),
        });
    }
    Ok(data.iter().zip(key).map(|(d, k)| d ^ k).collect())
}
