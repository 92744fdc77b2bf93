use super::*;
use proptest::prelude::*;

fn material(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

#[test]
fn test_level_conversion() {
    for level in SecurityLevel::ALL {
        assert_eq!(SecurityLevel::try_from(level.as_u8()).unwrap(), level);
    }
    assert_eq!(
        SecurityLevel::try_from(0),
        Err(QkdError::UnsupportedLevel(0))
    );
    assert_eq!(
        SecurityLevel::try_from(5),
        Err(QkdError::UnsupportedLevel(5))
    );
    assert_eq!(serde_json::to_string(&SecurityLevel::Aead).unwrap(), "2");
    assert!(serde_json::from_str::<SecurityLevel>("7").is_err());
}

#[test]
fn test_level4_is_passthrough() {
    let sealed = encrypt(SecurityLevel::Plaintext, b"hello", None).unwrap();
    assert_eq!(sealed.algorithm, "PLAINTEXT");
    assert_eq!(sealed.ciphertext, b"hello");
    assert_eq!(sealed.metadata, CipherMetadata::default());
    assert_eq!(
        decrypt(SecurityLevel::Plaintext, &sealed, None).unwrap(),
        b"hello"
    );
}

#[test]
fn test_otp_ten_byte_message() {
    let message = b"attack now";
    let key = material(10);
    let sealed = encrypt(SecurityLevel::OneTimePad, message, Some(&key)).unwrap();
    assert_eq!(sealed.algorithm, "OTP");
    assert_eq!(sealed.metadata.otp_bytes, Some(10));
    assert_ne!(&sealed.ciphertext[..], &message[..]);
    assert_eq!(
        decrypt(SecurityLevel::OneTimePad, &sealed, Some(&key)).unwrap(),
        message
    );

    // A different pad decrypts without error to different bytes
    let mut other = key.clone();
    other[3] ^= 0x40;
    let garbled = decrypt(SecurityLevel::OneTimePad, &sealed, Some(&other)).unwrap();
    assert_ne!(&garbled[..], &message[..]);
}

#[test]
fn test_otp_key_too_short() {
    let key = material(4);
    assert_eq!(
        encrypt(SecurityLevel::OneTimePad, b"twelve bytes", Some(&key)),
        Err(QkdError::KeyTooShort {
            level: 1,
            required: 12,
            actual: 4
        })
    );
}

#[test]
fn test_key_material_required() {
    assert_eq!(
        encrypt(SecurityLevel::OneTimePad, b"x", None),
        Err(QkdError::MissingKeyMaterial { level: 1 })
    );
    assert_eq!(
        encrypt(SecurityLevel::AeadReserved, b"x", None),
        Err(QkdError::MissingKeyMaterial { level: 3 })
    );
}

#[test]
fn test_aead_round_trip_and_metadata() {
    let key = material(64);
    for level in [SecurityLevel::Aead, SecurityLevel::AeadReserved] {
        let sealed = encrypt(level, b"quarterly numbers", Some(&key)).unwrap();
        assert_eq!(sealed.algorithm, "AES-256-GCM");
        assert_eq!(sealed.metadata.aad.as_deref(), Some(aad_tag(level)));
        let nonce = base64::decode(sealed.metadata.nonce_b64.as_ref().unwrap()).unwrap();
        assert_eq!(nonce.len(), 12);
        assert_eq!(sealed.ciphertext.len(), b"quarterly numbers".len() + 16);
        assert_eq!(
            decrypt(level, &sealed, Some(&key)).unwrap(),
            b"quarterly numbers"
        );
    }
}

#[test]
fn test_aead_uses_fresh_nonce_per_payload() {
    let key = material(64);
    let a = encrypt(SecurityLevel::Aead, b"same", Some(&key)).unwrap();
    let b = encrypt(SecurityLevel::Aead, b"same", Some(&key)).unwrap();
    assert_ne!(a.metadata.nonce_b64, b.metadata.nonce_b64);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn test_aead_derives_from_leading_64_bytes() {
    let key = material(64);
    let mut longer = key.clone();
    longer.extend_from_slice(&[0xAA; 32]);
    let sealed = encrypt(SecurityLevel::Aead, b"payload", Some(&longer)).unwrap();
    assert_eq!(
        decrypt(SecurityLevel::Aead, &sealed, Some(&key)).unwrap(),
        b"payload"
    );

    assert_eq!(
        encrypt(SecurityLevel::Aead, b"payload", Some(&key[..63])),
        Err(QkdError::KeyTooShort {
            level: 2,
            required: 64,
            actual: 63
        })
    );
}

#[test]
fn test_aead_levels_are_not_interchangeable() {
    let key = material(64);
    let sealed = encrypt(SecurityLevel::Aead, b"level two", Some(&key)).unwrap();
    assert_eq!(
        decrypt(SecurityLevel::AeadReserved, &sealed, Some(&key)),
        Err(QkdError::AuthenticationFailure { level: 3 })
    );
    assert_ne!(
        derive_key(SecurityLevel::Aead, &key).unwrap()[..],
        derive_key(SecurityLevel::AeadReserved, &key).unwrap()[..]
    );
}

#[test]
fn test_aead_wrong_key_fails_authentication() {
    let key = material(64);
    let sealed = encrypt(SecurityLevel::Aead, b"secret", Some(&key)).unwrap();
    let mut other = key.clone();
    other[0] ^= 1;
    assert_eq!(
        decrypt(SecurityLevel::Aead, &sealed, Some(&other)),
        Err(QkdError::AuthenticationFailure { level: 2 })
    );
}

#[test]
fn test_aead_missing_metadata() {
    let key = material(64);
    let sealed = encrypt(SecurityLevel::Aead, b"secret", Some(&key)).unwrap();

    let mut no_nonce = sealed.clone();
    no_nonce.metadata.nonce_b64 = None;
    assert_eq!(
        decrypt(SecurityLevel::Aead, &no_nonce, Some(&key)),
        Err(QkdError::insufficient_metadata("nonce_b64"))
    );

    let mut bad_nonce = sealed.clone();
    bad_nonce.metadata.nonce_b64 = Some("not base64!".to_string());
    assert_eq!(
        decrypt(SecurityLevel::Aead, &bad_nonce, Some(&key)),
        Err(QkdError::insufficient_metadata("nonce_b64"))
    );

    let mut short_nonce = sealed.clone();
    short_nonce.metadata.nonce_b64 = Some(base64::encode([0u8; 8]));
    assert_eq!(
        decrypt(SecurityLevel::Aead, &short_nonce, Some(&key)),
        Err(QkdError::insufficient_metadata("nonce_b64"))
    );

    let mut no_aad = sealed.clone();
    no_aad.metadata.aad = None;
    assert_eq!(
        decrypt(SecurityLevel::Aead, &no_aad, Some(&key)),
        Err(QkdError::insufficient_metadata("aad"))
    );

    let mut wrong_aad = sealed.clone();
    wrong_aad.metadata.aad = Some("qumail-level3".to_string());
    assert_eq!(
        decrypt(SecurityLevel::Aead, &wrong_aad, Some(&key)),
        Err(QkdError::AuthenticationFailure { level: 2 })
    );

    let mut wrong_algorithm = sealed;
    wrong_algorithm.algorithm = "OTP".to_string();
    assert_eq!(
        decrypt(SecurityLevel::Aead, &wrong_algorithm, Some(&key)),
        Err(QkdError::insufficient_metadata("algorithm"))
    );
}

#[test]
fn test_metadata_wire_shape() {
    let otp = CipherMetadata {
        otp_bytes: Some(10),
        ..Default::default()
    };
    assert_eq!(serde_json::to_string(&otp).unwrap(), r#"{"otp_bytes":10}"#);
    let parsed: CipherMetadata =
        serde_json::from_str(r#"{"nonce_b64":"AAAAAAAAAAAAAAAA","aad":"qumail-level2"}"#).unwrap();
    assert_eq!(parsed.aad.as_deref(), Some("qumail-level2"));
    assert_eq!(parsed.otp_bytes, None);
}

#[test]
fn test_plan_level1_ranges_never_overlap() {
    let plan = KeyPlan::new(SecurityLevel::OneTimePad, &[10, 0, 25, 5]);
    assert_eq!(plan.key_bytes(), 40);
    assert_eq!(plan.payload_count(), 4);
    assert_eq!(plan.range(0), Some(0..10));
    assert_eq!(plan.range(1), Some(10..10));
    assert_eq!(plan.range(2), Some(10..35));
    assert_eq!(plan.range(3), Some(35..40));
    assert_eq!(plan.range(4), None);

    let key = material(40);
    assert_eq!(plan.key_for(2, &key).unwrap(), Some(&key[10..35]));
    assert_eq!(
        plan.key_for(3, &key[..38]),
        Err(QkdError::KeyTooShort {
            level: 1,
            required: 40,
            actual: 38
        })
    );
    assert!(matches!(
        plan.key_for(9, &key),
        Err(QkdError::InvalidParameter { .. })
    ));
}

#[test]
fn test_plan_aead_and_plaintext() {
    let plan = KeyPlan::new(SecurityLevel::AeadReserved, &[1000, 3]);
    assert_eq!(plan.key_bytes(), 64);
    assert_eq!(plan.range(0), plan.range(1));

    let plan = KeyPlan::new(SecurityLevel::Plaintext, &[1000]);
    assert_eq!(plan.key_bytes(), 0);
    assert_eq!(plan.key_for(0, &[]).unwrap(), None);
}

proptest! {
    #[test]
    fn prop_otp_round_trip(
        plaintext in proptest::collection::vec(any::<u8>(), 0..512),
        extra in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut key: Vec<u8> = plaintext.iter().map(|b| b.wrapping_mul(7).wrapping_add(13)).collect();
        key.extend_from_slice(&extra);
        let sealed = encrypt(SecurityLevel::OneTimePad, &plaintext, Some(&key)).unwrap();
        prop_assert_eq!(decrypt(SecurityLevel::OneTimePad, &sealed, Some(&key)).unwrap(), plaintext);
    }

    #[test]
    fn prop_aead_bit_flip_is_rejected(
        plaintext in proptest::collection::vec(any::<u8>(), 0..256),
        position in any::<usize>(),
        bit in 0u8..8,
    ) {
        let key = material(64);
        let mut sealed = encrypt(SecurityLevel::Aead, &plaintext, Some(&key)).unwrap();
        let index = position % sealed.ciphertext.len();
        sealed.ciphertext[index] ^= 1 << bit;
        prop_assert_eq!(
            decrypt(SecurityLevel::Aead, &sealed, Some(&key)),
            Err(QkdError::AuthenticationFailure { level: 2 })
        );
    }
}
