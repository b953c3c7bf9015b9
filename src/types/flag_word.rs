//! Flag word layout and the small value types built on it.
//!
//! A [`FlagWord`] is split into two ranges:
//!
//! - `[0, P)`: pre-existing flags, one bit per selected correlation.
//! - `[P, P + K)`: agent bits, one bit per registered agent.
//!
//! Row words use a different layout: bits 0 and 1 are the reserved
//! [`ROW_FLAGGED`] and [`ROW_ABSENT`] constants, and agent `k` (in
//! registration order) owns bit `ROW_RESERVED_BITS + k`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utilities::errors::{FlagError, Result};

/// One cell of the flag lattice.
pub type FlagWord = u64;

/// Width of a [`FlagWord`] in bits.
pub const WORD_BITS: u32 = FlagWord::BITS;

/// Row bit: the row was flagged in the source before this run.
pub const ROW_FLAGGED: FlagWord = 1;

/// Row bit: the source has no row for this baseline and time.
pub const ROW_ABSENT: FlagWord = 1 << 1;

/// Number of low row-word bits reserved for [`ROW_FLAGGED`] and [`ROW_ABSENT`].
pub const ROW_RESERVED_BITS: u32 = 2;

/// Single-bit mask for bit `index`.
#[inline]
pub const fn bit(index: u32) -> FlagWord {
    1 << index
}

// ---------------------------------------------------------------------------
// CorrelationMask
// ---------------------------------------------------------------------------

/// Set of selected-correlation indices, stored in the low bits of a word.
///
/// Bit `k` stands for the `k`-th selected correlation of the chunk, which is
/// also the position of that correlation's pre-existing flag bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationMask(FlagWord);

impl CorrelationMask {
    /// No correlations.
    pub const EMPTY: CorrelationMask = CorrelationMask(0);

    /// Mask covering the first `count` correlations.
    pub fn all(count: usize) -> Self {
        if count >= WORD_BITS as usize {
            CorrelationMask(FlagWord::MAX)
        } else {
            CorrelationMask(bit(count as u32) - 1)
        }
    }

    /// Mask from explicit correlation indices.
    pub fn from_indices(indices: &[usize]) -> Result<Self> {
        let mut mask = 0;
        for &index in indices {
            if index >= WORD_BITS as usize {
                return Err(FlagError::InvalidShape(format!(
                    "correlation index {} does not fit a {}-bit flag word",
                    index, WORD_BITS
                )));
            }
            mask |= bit(index as u32);
        }
        Ok(CorrelationMask(mask))
    }

    /// Wrap raw bits.
    pub const fn from_bits(bits: FlagWord) -> Self {
        CorrelationMask(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> FlagWord {
        self.0
    }

    /// Whether correlation `index` is in the set.
    pub fn contains(self, index: usize) -> bool {
        index < WORD_BITS as usize && self.0 & bit(index as u32) != 0
    }

    /// Whether the two sets share at least one correlation.
    pub fn intersects(self, other: CorrelationMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Restrict to the first `count` correlations.
    pub fn clamp(self, count: usize) -> Self {
        CorrelationMask(self.0 & CorrelationMask::all(count).0)
    }

    /// Number of correlations in the set.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the correlation indices in ascending order.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..WORD_BITS as usize).filter(move |&i| bits & bit(i as u32) != 0)
    }
}

impl fmt::Debug for CorrelationMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationMask({:#b})", self.0)
    }
}

// ---------------------------------------------------------------------------
// PreFlagPolicy
// ---------------------------------------------------------------------------

/// How an agent treats flags that already exist in the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreFlagPolicy {
    /// Pre-existing flags are invisible to the agent.
    Ignore,
    /// Like `Ignore` for the agent's own reads; in addition, pre-existing
    /// flags on the agent's correlations are dropped when the buffer is
    /// flushed.
    Reset,
    /// Pre-existing flags on the agent's correlations count as already bad.
    #[default]
    Honor,
}

impl fmt::Display for PreFlagPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreFlagPolicy::Ignore => write!(f, "ignore"),
            PreFlagPolicy::Reset => write!(f, "reset"),
            PreFlagPolicy::Honor => write!(f, "honor"),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentRole
// ---------------------------------------------------------------------------

/// What a raised agent bit means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// The sample is bad.
    #[default]
    Flag,
    /// The sample's pre-existing flag is lifted. Another agent's flag on the
    /// same sample still wins.
    Unflag,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Flag => write!(f, "flag"),
            AgentRole::Unflag => write!(f, "unflag"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
