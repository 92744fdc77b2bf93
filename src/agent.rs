/*!
 * Key agent
 *
 * Seals a message body and its attachments under one security level using
 * freshly delivered KM key material, and opens such messages on the
 * receiving side by consuming exactly the key range the sender used.
 * Transport of the sealed message is left to the caller.
 */

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::audit::{AuditEvent, AuditOperation, AuditSink, LogAuditSink};
use crate::cache::KeyCache;
use crate::client::KmClient;
use crate::engine::{self, CipherMetadata, KeyPlan, Sealed, SecurityLevel};
use crate::error::{QkdError, QkdResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// One encrypted payload with the metadata needed to decrypt it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub algorithm: String,
    pub ciphertext_b64: String,
    pub metadata: CipherMetadata,
}

impl SealedPart {
    fn new(name: Option<String>, sealed: Sealed) -> Self {
        Self {
            name,
            algorithm: sealed.algorithm,
            ciphertext_b64: base64::encode(&sealed.ciphertext),
            metadata: sealed.metadata,
        }
    }

    fn to_sealed(&self) -> QkdResult<Sealed> {
        let ciphertext = base64::decode(&self.ciphertext_b64)
            .map_err(|_| QkdError::insufficient_metadata("ciphertext_b64"))?;
        Ok(Sealed {
            algorithm: self.algorithm.clone(),
            ciphertext,
            metadata: self.metadata.clone(),
        })
    }
}

/// A sealed message plus the key reference the receiver needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub level: SecurityLevel,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub key_offset: usize,
    /// Key bytes the receiver must consume to open the message
    pub key_bytes: usize,
    /// Sender-side integrity verdict for the key material
    pub tampered: bool,
    pub body: SealedPart,
    #[serde(default)]
    pub attachments: Vec<SealedPart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    pub body: Vec<u8>,
    pub attachments: Vec<Attachment>,
    /// Sender verdict OR receiver verdict
    pub tampered: bool,
    /// Key material came from the local cache instead of the KM
    pub from_cache: bool,
}

pub struct KeyAgent {
    client: Arc<KmClient>,
    cache: Option<Arc<dyn KeyCache>>,
    audit: Arc<dyn AuditSink>,
}

impl KeyAgent {
    pub fn new(client: Arc<KmClient>) -> Self {
        Self {
            client,
            cache: None,
            audit: Arc::new(LogAuditSink),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn KeyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn client(&self) -> &Arc<KmClient> {
        &self.client
    }

    fn emit(&self, operation: AuditOperation, key_id: Option<&str>, level: SecurityLevel, tampered: bool) {
        self.audit
            .record(AuditEvent::new(operation, key_id, level.as_u8(), tampered));
    }

    /// Encrypts `body` and every attachment under `level`.
    ///
    /// Level 1 requests a key covering all payloads (at least the configured
    /// default length) and gives each payload its own range; levels 2 and 3
    /// request 64 bytes and use a fresh nonce per payload.
    pub fn seal(
        &self,
        level: SecurityLevel,
        body: &[u8],
        attachments: &[Attachment],
    ) -> QkdResult<SealedMessage> {
        let mut lens = vec![body.len()];
        lens.extend(attachments.iter().map(|a| a.data.len()));
        let plan = KeyPlan::new(level, &lens);

        let mut key_id = None;
        let mut tampered = false;
        let mut material = Zeroizing::new(Vec::new());
        if level.requires_key() {
            let request_len = match level {
                SecurityLevel::OneTimePad => {
                    plan.key_bytes().max(self.client.config().default_key_length)
                }
                _ => plan.key_bytes(),
            };
            let key = self.client.request_key(request_len)?;
            let id = key.value.key_id.clone();
            self.emit(AuditOperation::KeyRequested, Some(&id), level, key.tampered);
            if key.tampered {
                self.emit(AuditOperation::TamperDetected, Some(&id), level, true);
            }
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put(&id, &key.material) {
                    log::warn!("Could not cache key {}: {}", id, e);
                }
            }
            tampered = key.tampered;
            material = key.material;
            key_id = Some(id);
        }

        let payloads = std::iter::once((None, body))
            .chain(attachments.iter().map(|a| (Some(a.name.clone()), &a.data[..])));
        let mut parts = Vec::with_capacity(lens.len());
        for (index, (name, payload)) in payloads.enumerate() {
            let key = plan.key_for(index, &material)?;
            let sealed = engine::encrypt(level, payload, key)?;
            self.emit(AuditOperation::PayloadEncrypted, key_id.as_deref(), level, tampered);
            parts.push(SealedPart::new(name, sealed));
        }
        let body = parts.remove(0);

        log::info!(
            "Sealed message at {} with {} attachment(s), key_bytes={}",
            level,
            parts.len(),
            plan.key_bytes()
        );
        Ok(SealedMessage {
            level,
            algorithm: level.algorithm().to_string(),
            key_id,
            key_offset: 0,
            key_bytes: plan.key_bytes(),
            tampered,
            body,
            attachments: parts,
        })
    }

    /// Consumes the message's key range and decrypts every part.
    ///
    /// When the KM is unreachable and offline fallback is enabled, the
    /// range is read from the local cache instead.
    pub fn open(&self, message: &SealedMessage) -> QkdResult<OpenedMessage> {
        let level = message.level;
        let sealed_parts = std::iter::once(&message.body)
            .chain(message.attachments.iter())
            .map(SealedPart::to_sealed)
            .collect::<QkdResult<Vec<_>>>()?;
        let lens: Vec<usize> = sealed_parts.iter().map(|s| s.ciphertext.len()).collect();
        let plan = KeyPlan::new(level, &lens);
        if plan.key_bytes() != message.key_bytes {
            return Err(QkdError::insufficient_metadata("key_bytes"));
        }

        let (material, receiver_tampered, from_cache) = if level.requires_key() {
            let key_id = message.key_id.as_deref().ok_or(QkdError::MissingKeyMaterial {
                level: level.as_u8(),
            })?;
            self.receive_key(level, key_id, message.key_offset, message.key_bytes)?
        } else {
            (Zeroizing::new(Vec::new()), false, false)
        };

        let mut plaintexts = Vec::with_capacity(sealed_parts.len());
        for (index, sealed) in sealed_parts.iter().enumerate() {
            let key = plan.key_for(index, &material)?;
            plaintexts.push(engine::decrypt(level, sealed, key)?);
            self.emit(
                AuditOperation::PayloadDecrypted,
                message.key_id.as_deref(),
                level,
                receiver_tampered,
            );
        }

        let body = plaintexts.remove(0);
        let attachments = message
            .attachments
            .iter()
            .zip(plaintexts)
            .map(|(part, data)| Attachment {
                name: part.name.clone().unwrap_or_default(),
                data,
            })
            .collect();
        Ok(OpenedMessage {
            body,
            attachments,
            tampered: message.tampered || receiver_tampered,
            from_cache,
        })
    }

    fn receive_key(
        &self,
        level: SecurityLevel,
        key_id: &str,
        key_offset: usize,
        key_bytes: usize,
    ) -> QkdResult<(Zeroizing<Vec<u8>>, bool, bool)> {
        if key_bytes == 0 {
            return Ok((Zeroizing::new(Vec::new()), false, false));
        }
        match self.client.consume(key_id, key_bytes) {
            Ok(slice) => {
                self.emit(AuditOperation::KeyConsumed, Some(key_id), level, slice.tampered);
                if slice.tampered {
                    self.emit(AuditOperation::TamperDetected, Some(key_id), level, true);
                }
                if slice.value != key_offset {
                    return Err(QkdError::protocol_failure(
                        "open",
                        &format!(
                            "key {} range already consumed: expected offset {}, got {}",
                            key_id, key_offset, slice.value
                        ),
                    ));
                }
                Ok((slice.material, slice.tampered, false))
            }
            Err(err) if err.is_transient() && self.client.config().use_cached_when_offline => {
                let cached = self
                    .cache
                    .as_ref()
                    .and_then(|cache| cache.get(key_id))
                    .ok_or(err)?;
                let range = cached
                    .get(key_offset..key_offset.saturating_add(key_bytes))
                    .ok_or(QkdError::KeyTooShort {
                        level: level.as_u8(),
                        required: key_offset.saturating_add(key_bytes),
                        actual: cached.len(),
                    })?;
                log::warn!(
                    "KM unreachable, using cached key material for {} ({} bytes)",
                    key_id,
                    key_bytes
                );
                Ok((Zeroizing::new(range.to_vec()), false, true))
            }
            Err(err) => Err(err),
        }
    }
}
