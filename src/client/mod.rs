/*!
 * KM client
 *
 * Synchronous request/response client for the KM service with bounded
 * retry, dual-path key creation and client-side integrity verification,
 * plus an async handle for callers that must not block.
 */

mod handle;
mod km_client;
mod retry;
mod verified;

pub use handle::KmHandle;
pub use km_client::KmClient;
pub use retry::{RetryPolicy, MAX_BACKOFF};
pub use verified::Verified;
