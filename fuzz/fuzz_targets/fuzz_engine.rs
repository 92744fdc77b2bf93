#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qumail_km::engine::{self, CipherMetadata, Sealed, SecurityLevel};

#[derive(Arbitrary, Debug)]
struct EngineFuzzInput {
    level: u8,
    plaintext: Vec<u8>,
    key: Vec<u8>,
    algorithm: String,
    ciphertext: Vec<u8>,
    nonce_b64: Option<String>,
    aad: Option<String>,
    otp_bytes: Option<usize>,
}

fuzz_target!(|input: EngineFuzzInput| {
    let level = match SecurityLevel::try_from(input.level) {
        Ok(level) => level,
        Err(_) => return,
    };

    // Whatever arrives on the wire must be rejected cleanly, never panic
    let forged = Sealed {
        algorithm: input.algorithm,
        ciphertext: input.ciphertext,
        metadata: CipherMetadata {
            otp_bytes: input.otp_bytes,
            nonce_b64: input.nonce_b64,
            aad: input.aad,
        },
    };
    let _ = engine::decrypt(level, &forged, Some(&input.key));
    let _ = engine::decrypt(level, &forged, None);

    if let Ok(sealed) = engine::encrypt(level, &input.plaintext, Some(&input.key)) {
        let opened = engine::decrypt(level, &sealed, Some(&input.key))
            .expect("freshly sealed payload must open");
        assert_eq!(opened, input.plaintext);
    }
});
