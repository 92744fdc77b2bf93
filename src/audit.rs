/*!
 * Audit events
 *
 * Flat `(operation, key_id, level, tampered, timestamp)` records for key
 * requests, consumption, payload encryption/decryption and tamper
 * detection. Where they go is up to the [`AuditSink`] handed to the
 * component that emits them.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    KeyRequested,
    KeyConsumed,
    PayloadEncrypted,
    PayloadDecrypted,
    TamperDetected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub operation: AuditOperation,
    pub key_id: Option<String>,
    pub level: u8,
    pub tampered: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(operation: AuditOperation, key_id: Option<&str>, level: u8, tampered: bool) -> Self {
        Self {
            operation,
            key_id: key_id.map(str::to_string),
            level,
            tampered,
            timestamp: Utc::now(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

fn to_json(event: &AuditEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|err| {
        log::warn!("audit: failed to serialize audit event error={}", err);
        "{\"operation\":\"serialize_failed\"}".to_string()
    })
}

/// Writes each event as a JSON line on log target `audit`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        if event.tampered {
            log::warn!(target: "audit", "{}", to_json(&event));
        } else {
            log::info!(target: "audit", "{}", to_json(&event));
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn operations(&self) -> Vec<AuditOperation> {
        self.events().iter().map(|e| e.operation).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(err) => log::warn!("audit: failed to lock memory sink error={}", err),
        }
    }
}

/// Appends JSON lines to a file
#[derive(Debug)]
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        let json = to_json(&event);
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", json).and_then(|_| file.flush()) {
                    log::warn!("audit: failed to write audit event error={}", err);
                }
            }
            Err(err) => log::warn!("audit: failed to lock audit file error={}", err),
        }
    }
}

/// Discards events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}
