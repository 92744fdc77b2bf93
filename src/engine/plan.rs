use std::ops::Range;

use super::aead::AEAD_KEY_MATERIAL_LEN;
use super::level::SecurityLevel;
use crate::error::{QkdError, QkdResult};

/// Key sizing and per-payload key ranges for one message.
///
/// Level 1 gives every payload its own consecutive, non-overlapping range so
/// no pad byte is ever used twice. Levels 2 and 3 share one
/// [`AEAD_KEY_MATERIAL_LEN`] range; each payload gets a fresh nonce instead.
/// Level 4 needs no key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPlan {
    level: SecurityLevel,
    ranges: Vec<Range<usize>>,
    key_bytes: usize,
}

impl KeyPlan {
    pub fn new(level: SecurityLevel, payload_lens: &[usize]) -> Self {
        let (ranges, key_bytes) = match level {
            SecurityLevel::OneTimePad => {
                let mut offset = 0;
                let ranges = payload_lens
                    .iter()
                    .map(|len| {
                        let range = offset..offset + len;
                        offset += len;
                        range
                    })
                    .collect();
                (ranges, offset)
            }
            SecurityLevel::Aead | SecurityLevel::AeadReserved => (
                vec![0..AEAD_KEY_MATERIAL_LEN; payload_lens.len()],
                AEAD_KEY_MATERIAL_LEN,
            ),
            SecurityLevel::Plaintext => (vec![0..0; payload_lens.len()], 0),
        };
        Self {
            level,
            ranges,
            key_bytes,
        }
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Key bytes the message consumes in total
    pub fn key_bytes(&self) -> usize {
        self.key_bytes
    }

    pub fn payload_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn range(&self, index: usize) -> Option<Range<usize>> {
        self.ranges.get(index).cloned()
    }

    /// Key slice for payload `index`, or `None` at level 4.
    pub fn key_for<'a>(&self, index: usize, material: &'a [u8]) -> QkdResult<Option<&'a [u8]>> {
        if !self.level.requires_key() {
            return Ok(None);
        }
        let range = self.range(index).ok_or_else(|| {
            QkdError::invalid_parameter(
                "payload index",
                &format!("less than {}", self.ranges.len()),
                &index.to_string(),
            )
        })?;
        match material.get(range.clone()) {
            Some(key) => Ok(Some(key)),
            None => Err(QkdError::KeyTooShort {
                level: self.level.as_u8(),
                required: range.end,
                actual: material.len(),
            }),
        }
    }
}
