/*!
 * Key store for quantum-simulated key material
 *
 * Owns every key record and enforces consumption, expiry and use-count
 * limits. Optionally persists to a JSON snapshot so in-flight keys survive
 * a restart.
 */

mod clock;
mod key_store;
mod persist;
mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key_store::KeyStore;
pub use record::{Consumption, CreatedKey, KeyMetadata, KeyRequest};

#[cfg(test)]
mod tests;
