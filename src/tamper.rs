/*!
 * Intrusion simulation
 *
 * A process-wide toggle that, when on, corrupts key bytes on their way out of
 * the KM server. Digests are always computed by the caller over the original
 * bytes before injection, which is what lets clients detect the corruption.
 */

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One corrupted byte per this many bytes of payload, at least one.
pub const BYTES_PER_FLIP: usize = 64;

#[derive(Debug)]
pub struct TamperInjector {
    enabled: AtomicBool,
    rng: Mutex<ChaCha20Rng>,
}

impl Default for TamperInjector {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TamperInjector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }

    /// Injector with a fixed seed, for reproducible corruption.
    pub fn with_seed(enabled: bool, seed: u64) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            log::warn!(
                "Intrusion simulation {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    /// Returns `data` unchanged when disabled. When enabled, flips the low bit
    /// of `max(1, len / 64)` distinct bytes, so at least one byte always differs.
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        if !self.is_enabled() || out.is_empty() {
            return out;
        }

        let flips = flip_count(out.len());
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        for position in index::sample(&mut *rng, out.len(), flips) {
            out[position] ^= 0x01;
        }
        out
    }
}

pub fn flip_count(len: usize) -> usize {
    (len / BYTES_PER_FLIP).max(1)
}
