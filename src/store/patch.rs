//! Per-agent, per-buffer bit patches.
//!
//! While a buffer is being evaluated an agent does not touch the shared
//! store. Its set/clear operations are recorded in a [`FlagPatch`] for the
//! current time slot and applied after the dispatcher's barrier. Discarding
//! a patch is how a failed agent's writes are rolled back.
//!
//! A patch also carries the cells and rows whose pre-existing flags a
//! `Reset` agent asked to drop. Out-of-slot coordinates are rejected with
//! [`FlagError::InvalidShape`] and leave the patch untouched.

use crate::types::{bit, FlagWord};
use crate::utilities::errors::{FlagError, Result};

/// Dense bit set over `0..len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitPlane {
    words: Vec<u64>,
    len: usize,
}

impl BitPlane {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & bit((index % 64) as u32) != 0
    }

    /// Set `index`. Returns `false`, changing nothing, when it is out of range.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / 64] |= bit((index % 64) as u32);
        true
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] &= !bit((index % 64) as u32);
        }
    }

    /// Number of set positions.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set positions in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            let mut rest = w;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let tz = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(wi * 64 + tz)
            })
        })
    }
}

/// One agent's pending writes for one time slot.
///
/// Cells are indexed `baseline * channels + channel`; rows by baseline.
/// A position is never in both the set and the clear plane: the last
/// operation on it wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagPatch {
    channels: usize,
    baselines: usize,
    set: BitPlane,
    clear: BitPlane,
    row_set: BitPlane,
    row_clear: BitPlane,
    reset: BitPlane,
    row_reset: BitPlane,
}

impl FlagPatch {
    pub fn new(channels: usize, baselines: usize) -> Self {
        let cells = channels * baselines;
        Self {
            channels,
            baselines,
            set: BitPlane::new(cells),
            clear: BitPlane::new(cells),
            row_set: BitPlane::new(baselines),
            row_clear: BitPlane::new(baselines),
            reset: BitPlane::new(cells),
            row_reset: BitPlane::new(baselines),
        }
    }

    fn cell(&self, channel: usize, baseline: usize) -> Result<usize> {
        if channel < self.channels && baseline < self.baselines {
            Ok(baseline * self.channels + channel)
        } else {
            Err(FlagError::InvalidShape(format!(
                "cell ({}, {}) outside {}x{} slot",
                channel, baseline, self.channels, self.baselines
            )))
        }
    }

    fn row(&self, baseline: usize) -> Result<usize> {
        if baseline < self.baselines {
            Ok(baseline)
        } else {
            Err(FlagError::InvalidShape(format!(
                "row {} outside slot of {} baselines",
                baseline, self.baselines
            )))
        }
    }

    // --- Recording ---

    pub fn set(&mut self, channel: usize, baseline: usize) -> Result<()> {
        let i = self.cell(channel, baseline)?;
        self.clear.remove(i);
        self.set.insert(i);
        Ok(())
    }

    pub fn clear(&mut self, channel: usize, baseline: usize) -> Result<()> {
        let i = self.cell(channel, baseline)?;
        self.set.remove(i);
        self.clear.insert(i);
        Ok(())
    }

    pub fn set_row(&mut self, baseline: usize) -> Result<()> {
        let i = self.row(baseline)?;
        self.row_clear.remove(i);
        self.row_set.insert(i);
        Ok(())
    }

    pub fn clear_row(&mut self, baseline: usize) -> Result<()> {
        let i = self.row(baseline)?;
        self.row_set.remove(i);
        self.row_clear.insert(i);
        Ok(())
    }

    /// Drop the pre-existing flags of a cell at flush, for the agent's
    /// correlations.
    pub fn reset(&mut self, channel: usize, baseline: usize) -> Result<()> {
        let i = self.cell(channel, baseline)?;
        self.reset.insert(i);
        Ok(())
    }

    /// Drop the pre-existing row flag of a baseline at flush.
    pub fn reset_row(&mut self, baseline: usize) -> Result<()> {
        let i = self.row(baseline)?;
        self.row_reset.insert(i);
        Ok(())
    }

    // --- Queries ---

    /// Pending state of a cell: `Some(true)` set, `Some(false)` cleared,
    /// `None` untouched or outside the slot.
    pub fn cell_state(&self, channel: usize, baseline: usize) -> Option<bool> {
        let i = self.cell(channel, baseline).ok()?;
        if self.set.contains(i) {
            Some(true)
        } else if self.clear.contains(i) {
            Some(false)
        } else {
            None
        }
    }

    /// Pending state of a row, same encoding as [`cell_state`](Self::cell_state).
    pub fn row_state(&self, baseline: usize) -> Option<bool> {
        if self.row_set.contains(baseline) {
            Some(true)
        } else if self.row_clear.contains(baseline) {
            Some(false)
        } else {
            None
        }
    }

    /// Whether a reset of this cell is pending.
    pub fn is_reset(&self, channel: usize, baseline: usize) -> bool {
        self.cell(channel, baseline)
            .map(|i| self.reset.contains(i))
            .unwrap_or(false)
    }

    pub fn is_row_reset(&self, baseline: usize) -> bool {
        self.row_reset.contains(baseline)
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.set,
            &self.clear,
            &self.row_set,
            &self.row_clear,
            &self.reset,
            &self.row_reset,
        ]
        .iter()
        .all(|plane| plane.count() == 0)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn baselines(&self) -> usize {
        self.baselines
    }

    pub(crate) fn set_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.set.iter_ones()
    }

    pub(crate) fn cleared_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.clear.iter_ones()
    }

    pub(crate) fn set_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.row_set.iter_ones()
    }

    pub(crate) fn cleared_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.row_clear.iter_ones()
    }

    pub(crate) fn reset_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.reset.iter_ones()
    }

    pub(crate) fn reset_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.row_reset.iter_ones()
    }
}

/// What applying a patch actually changed.
///
/// Only transitions are counted: setting an already-set bit is not a change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub cells_set: u64,
    pub cells_cleared: u64,
    pub rows_set: u64,
    pub rows_cleared: u64,
}

impl PatchOutcome {
    pub(crate) fn record_cell(&mut self, previous: FlagWord, mask: FlagWord, setting: bool) {
        match (setting, previous & mask != 0) {
            (true, false) => self.cells_set += 1,
            (false, true) => self.cells_cleared += 1,
            _ => {}
        }
    }

    pub(crate) fn record_row(&mut self, previous: FlagWord, mask: FlagWord, setting: bool) {
        match (setting, previous & mask != 0) {
            (true, false) => self.rows_set += 1,
            (false, true) => self.rows_cleared += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_plane() {
        let mut plane = BitPlane::new(130);
        plane.insert(0);
        plane.insert(64);
        assert!(plane.insert(129));
        assert!(!plane.insert(130));
        assert!(plane.contains(64));
        assert!(!plane.contains(65));
        assert!(!plane.contains(500));
        assert_eq!(plane.count(), 3);
        assert_eq!(plane.iter_ones().collect::<Vec<_>>(), vec![0, 64, 129]);
        plane.remove(64);
        assert_eq!(plane.iter_ones().collect::<Vec<_>>(), vec![0, 129]);
    }

    #[test]
    fn test_last_operation_wins() {
        let mut patch = FlagPatch::new(4, 2);
        assert_eq!(patch.cell_state(1, 1), None);
        patch.set(1, 1).unwrap();
        assert_eq!(patch.cell_state(1, 1), Some(true));
        patch.clear(1, 1).unwrap();
        assert_eq!(patch.cell_state(1, 1), Some(false));
        assert_eq!(patch.set_cells().count(), 0);
        assert_eq!(patch.cleared_cells().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_rows() {
        let mut patch = FlagPatch::new(2, 3);
        patch.set_row(2).unwrap();
        assert_eq!(patch.row_state(2), Some(true));
        patch.clear_row(2).unwrap();
        assert_eq!(patch.row_state(2), Some(false));
        assert_eq!(patch.row_state(0), None);
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_out_of_slot_coordinates_rejected() {
        let mut patch = FlagPatch::new(2, 2);
        assert!(matches!(patch.set(2, 0), Err(FlagError::InvalidShape(_))));
        assert!(patch.clear(0, 2).is_err());
        assert!(patch.set_row(2).is_err());
        assert!(patch.clear_row(usize::MAX).is_err());
        assert!(patch.reset(5, 5).is_err());
        assert!(patch.reset_row(2).is_err());
        assert_eq!(patch.cell_state(2, 0), None);
        assert!(patch.is_empty());
    }

    #[test]
    fn test_reset_planes() {
        let mut patch = FlagPatch::new(3, 2);
        patch.reset(2, 1).unwrap();
        patch.reset_row(0).unwrap();
        assert!(!patch.is_empty());
        assert!(patch.is_reset(2, 1));
        assert!(!patch.is_reset(2, 0));
        assert!(patch.is_row_reset(0));
        assert_eq!(patch.cell_state(2, 1), None);
        assert_eq!(patch.reset_cells().collect::<Vec<_>>(), vec![5]);
        assert_eq!(patch.reset_rows().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_outcome_counts_transitions_only() {
        let mut outcome = PatchOutcome::default();
        outcome.record_cell(0, 0b100, true);
        outcome.record_cell(0b100, 0b100, true);
        outcome.record_cell(0b100, 0b100, false);
        outcome.record_cell(0, 0b100, false);
        assert_eq!(outcome.cells_set, 1);
        assert_eq!(outcome.cells_cleared, 1);
    }
}
