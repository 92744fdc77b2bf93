use std::sync::Arc;

use crate::config::{ServerConfig, DEFAULT_MAX_KEY_LENGTH};
use crate::error::QkdResult;
use crate::integrity::IntegritySecret;
use crate::store::KeyStore;
use crate::tamper::TamperInjector;

/// Everything the KM routes share. Built once and injected into the router.
#[derive(Debug)]
pub struct KmState {
    pub store: Arc<KeyStore>,
    pub tamper: TamperInjector,
    pub secret: IntegritySecret,
    /// Creation requests above this length are rejected with 400
    pub max_key_length: usize,
}

impl KmState {
    pub fn new(store: Arc<KeyStore>, tamper: TamperInjector, secret: IntegritySecret) -> Self {
        Self {
            store,
            tamper,
            secret,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    /// Builds the state described by a server configuration, opening the
    /// persistent store when a store path is set.
    pub fn from_config(config: &ServerConfig) -> QkdResult<Self> {
        let store = match &config.store_path {
            Some(path) => KeyStore::open(path)?,
            None => KeyStore::in_memory(),
        };
        Ok(Self::new(
            Arc::new(store),
            TamperInjector::new(config.intrusion_on),
            IntegritySecret::new(&config.integrity_secret),
        )
        .with_max_key_length(config.max_key_length))
    }

    /// Digest over the original bytes, then the (possibly corrupted) bytes to send.
    pub(crate) fn outbound(&self, original: &[u8]) -> (Vec<u8>, String) {
        let digest = self.secret.digest_hex(original);
        let sent = self.tamper.apply(original);
        (sent, digest)
    }
}
