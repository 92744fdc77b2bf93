/*!
 * QuMail Key Manager
 *
 * A simulated quantum-key-distribution key manager and the tiered
 * encryption engine that consumes its key material.
 *
 * The pieces, leaf first:
 *
 * - A key store that hands out contiguous, never-overlapping ranges of each
 *   key and enforces expiry and use caps
 * - A tamper injector that corrupts outbound key bytes on demand while the
 *   integrity digest stays computed over the originals
 * - The KM HTTP service and a blocking client with retry and integrity
 *   verification
 * - An encryption engine with four levels: one-time pad, two AES-256-GCM
 *   variants under HKDF-derived keys, and plaintext
 */

/// Error taxonomy shared by every component
pub mod error;

/// Layered server, client and cache configuration
pub mod config;

/// Keyed digest used for tamper detection
pub mod integrity;

/// Authoritative key records and sequential consumption
pub mod store;

/// Intrusion simulation
pub mod tamper;

/// KM wire contract
pub mod protocol;

/// KM HTTP service
pub mod server;

/// KM client
pub mod client;

/// Tiered encryption engine
pub mod engine;

/// Local fallback key cache
pub mod cache;

/// Audit events and sinks
pub mod audit;

/// Message sealing and opening over KM-delivered keys
pub mod agent;

pub use agent::{Attachment, KeyAgent, OpenedMessage, SealedMessage, SealedPart};
pub use client::{KmClient, KmHandle, RetryPolicy, Verified};
pub use config::{CacheConfig, ClientConfig, ServerConfig};
pub use engine::{decrypt, encrypt, CipherMetadata, KeyPlan, Sealed, SecurityLevel};
pub use error::{QkdError, QkdResult};
pub use integrity::IntegritySecret;
pub use server::{build_router, run_km_server, BackgroundServer, KmState};
pub use store::{Consumption, KeyMetadata, KeyRequest, KeyStore};
pub use tamper::TamperInjector;

/// Commonly used types
pub mod prelude {
    pub use crate::agent::{Attachment, KeyAgent, SealedMessage};
    pub use crate::cache::{EncryptedFileKeyCache, KeyCache, MemoryKeyCache};
    pub use crate::client::{KmClient, KmHandle, Verified};
    pub use crate::config::{CacheConfig, ClientConfig, ServerConfig};
    pub use crate::engine::{decrypt, encrypt, SecurityLevel};
    pub use crate::error::{QkdError, QkdResult};
}
