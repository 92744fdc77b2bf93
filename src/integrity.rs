/*!
 * Keyed integrity digests for delivered key material
 *
 * The KM server computes an HMAC-SHA256 over the original bytes of every
 * slice it hands out and sends it as lowercase hex next to the (possibly
 * tampered) bytes. Clients holding the same shared secret recompute the
 * digest over what they actually received; a mismatch is the tamper signal.
 */

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Shared secret used for key-material digests
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct IntegritySecret {
    secret: Vec<u8>,
}

impl std::fmt::Debug for IntegritySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegritySecret")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IntegritySecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Hex-encoded HMAC-SHA256 of `data`
    pub fn digest_hex(&self, data: &[u8]) -> String {
        hex::encode(self.digest(data))
    }

    /// Recomputes the digest of `received` and compares it with `expected_hex`
    /// in constant time. A malformed hex digest never verifies.
    pub fn verify_hex(&self, received: &[u8], expected_hex: &str) -> bool {
        let expected = match hex::decode(expected_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let actual = self.digest(received);
        if actual.len() != expected.len() {
            return false;
        }
        actual.ct_eq(&expected).into()
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length, including empty ones
        let mut mac = match <HmacSha256 as Mac>::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_hex_sha256_length() {
        let secret = IntegritySecret::new("change_this_demo_secret");
        let digest = secret.digest_hex(b"key material");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let secret = IntegritySecret::new("Jefe");
        assert_eq!(
            secret.digest_hex(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_detects_single_bit_flip() {
        let secret = IntegritySecret::new("s3cret");
        let original = vec![0x5au8; 128];
        let digest = secret.digest_hex(&original);
        assert!(secret.verify_hex(&original, &digest));

        let mut flipped = original.clone();
        flipped[77] ^= 0x01;
        assert!(!secret.verify_hex(&flipped, &digest));
    }

    #[test]
    fn test_wrong_secret_or_garbage_digest_fails() {
        let data = b"slice";
        let digest = IntegritySecret::new("a").digest_hex(data);
        assert!(!IntegritySecret::new("b").verify_hex(data, &digest));
        assert!(!IntegritySecret::new("a").verify_hex(data, "not-hex"));
        assert!(!IntegritySecret::new("a").verify_hex(data, ""));
    }
}
