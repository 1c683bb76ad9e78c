//! Ordering key for the rank index.
//!
//! A player's rank is decided by a single scalar combining the best score and
//! the time it was reached:
//!
//! ```text
//! key = score * SCALE - achieved_at_ms
//! ```
//!
//! With `SCALE = 2^64` the score occupies the high 64 bits of a `u128` and the
//! low 64 bits hold `u64::MAX - achieved_at_ms`. This is the formula above
//! shifted by the constant `2^64 - 1`, so the ordering is identical while every
//! value stays exact and non-negative.

use shared::BestRecord;

const TIMESTAMP_BITS: u32 = 64;

/// Multiplier applied to the score. Must exceed every representable
/// timestamp so a one point difference can never be outweighed by time.
pub const SCALE: u128 = 1 << TIMESTAMP_BITS;

const _: () = assert!(SCALE > u64::MAX as u128);

/// Composite rank key. Larger keys rank higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedKey(u128);

impl EncodedKey {
    pub fn encode(score: u64, achieved_at_ms: u64) -> Self {
        EncodedKey(((score as u128) << TIMESTAMP_BITS) | (u64::MAX - achieved_at_ms) as u128)
    }

    pub fn from_best(best: &BestRecord) -> Self {
        Self::encode(best.score, best.achieved_at)
    }

    pub fn score(self) -> u64 {
        (self.0 >> TIMESTAMP_BITS) as u64
    }

    pub fn achieved_at(self) -> u64 {
        u64::MAX - self.0 as u64
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}
