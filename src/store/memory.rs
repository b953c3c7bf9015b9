//! Flag store memory estimate and ceiling check.

use serde::{Deserialize, Serialize};

use crate::types::FlagWord;
use crate::utilities::errors::{FlagError, Result};

/// Shape of the flag lattice for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreShape {
    pub channels: usize,
    pub baselines: usize,
    pub times: usize,
}

impl StoreShape {
    pub fn new(channels: usize, baselines: usize, times: usize) -> Self {
        Self {
            channels,
            baselines,
            times,
        }
    }

    /// Number of cell words, `None` on overflow.
    pub fn cell_count(&self) -> Option<usize> {
        self.channels
            .checked_mul(self.baselines)?
            .checked_mul(self.times)
    }

    /// Number of row words, `None` on overflow.
    pub fn row_count(&self) -> Option<usize> {
        self.baselines.checked_mul(self.times)
    }

    /// Cell words per time slot.
    pub fn slot_cells(&self) -> usize {
        self.channels * self.baselines
    }
}

/// Bytes needed by a flag store of the given shape.
///
/// Counts the cell and row lattices, their reset lattices of the same size,
/// and the per-slot loaded marker.
/// Saturates instead of overflowing, so an absurd shape always fails the
/// ceiling check.
pub fn estimate_memory_use(channels: usize, baselines: usize, times: usize) -> u64 {
    let word = std::mem::size_of::<FlagWord>() as u64;
    let cells = (channels as u64)
        .saturating_mul(baselines as u64)
        .saturating_mul(times as u64)
        .saturating_mul(word);
    let rows = (baselines as u64)
        .saturating_mul(times as u64)
        .saturating_mul(word);
    cells
        .saturating_mul(2)
        .saturating_add(rows.saturating_mul(2))
        .saturating_add(times as u64)
}

/// Memory ceiling applied before a flag store is allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    /// Maximum bytes for one chunk's flag store; `None` means unbounded.
    pub ceiling: Option<u64>,
}

impl MemoryBudget {
    pub fn unbounded() -> Self {
        Self { ceiling: None }
    }

    pub fn with_ceiling(bytes: u64) -> Self {
        Self {
            ceiling: Some(bytes),
        }
    }

    /// Fail with [`FlagError::ResourceExceeded`] if `shape` does not fit.
    pub fn check(&self, shape: StoreShape) -> Result<u64> {
        let required = estimate_memory_use(shape.channels, shape.baselines, shape.times);
        match self.ceiling {
            Some(ceiling) if required > ceiling => Err(FlagError::ResourceExceeded {
                channels: shape.channels,
                baselines: shape.baselines,
                times: shape.times,
                required,
                ceiling,
            }),
            _ => Ok(required),
        }
    }
}
