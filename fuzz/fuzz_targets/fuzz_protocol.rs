#![no_main]

use libfuzzer_sys::fuzz_target;
use qumail_km::protocol::{ConsumeRequest, CreateKeyRequest, ErrorBody, KeyCreatedResponse, SliceResponse};
use qumail_km::SealedMessage;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<CreateKeyRequest>(data);
    let _ = serde_json::from_slice::<ConsumeRequest>(data);
    let _ = serde_json::from_slice::<KeyCreatedResponse>(data);
    let _ = serde_json::from_slice::<SliceResponse>(data);
    let _ = serde_json::from_slice::<SealedMessage>(data);

    if let Ok(body) = serde_json::from_slice::<ErrorBody>(data) {
        let _ = body.into_error(400, "fuzz", Some("key"));
    }
});
