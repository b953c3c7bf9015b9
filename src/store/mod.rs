//! Flag store: the bit-packed (channel, baseline, time) flag lattice.
//!
//! The store owns one [`FlagWord`] per cell and one per (baseline, time) row
//! slot for the current chunk. Its shape is fixed for the chunk's lifetime;
//! a new allocation only happens at a chunk boundary or when the time cursor
//! moves backwards (a chunk restart).
//!
//! All agent-facing operations are scoped to one [`AgentRegistration`]: they
//! read, set or clear that agent's bit only. Set and clear are single atomic
//! operations, so agents with disjoint bits can share the store by `&`
//! reference. Coordinates outside the shape are an
//! [`InvalidShape`](FlagError::InvalidShape) error, never a panic.
//!
//! The store is owned by the per-chunk dispatcher and lent to agent workers;
//! there is no process-wide flag lattice.

pub mod lattice;
pub mod memory;
pub mod patch;
pub mod view;

pub use lattice::AtomicLattice;
pub use memory::{estimate_memory_use, MemoryBudget, StoreShape};
pub use patch::{BitPlane, FlagPatch, PatchOutcome};
pub use view::AgentView;

use crate::registry::AgentRegistration;
use crate::types::{bit, FlagWord, ROW_ABSENT, ROW_FLAGGED};
use crate::utilities::errors::{FlagError, Result};

/// Supplies the pre-existing flags of one time slot.
///
/// Implemented by the chunk source's buffer type; the store calls it at
/// most once per slot.
pub trait SlotLoader {
    /// Write this slot's pre-existing flags through `slot`.
    fn load(&self, slot: &mut SlotWriter<'_>) -> Result<()>;
}

/// Result of [`FlagStore::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Cursor moved; nothing was loaded.
    Positioned,
    /// Cursor moved and the slot's pre-existing flags were loaded.
    Loaded,
    /// The time index went backwards: storage was reallocated before the
    /// cursor moved.
    Restarted { loaded: bool },
}

/// The flag lattice for one chunk.
///
/// Next to the flag words the store keeps two reset lattices: per cell, the
/// correlation bits whose pre-existing flags a `Reset` agent dropped, and
/// per row, the row bits of the `Reset` agents that dropped the source row
/// flag. Both only ever grow within a slot.
#[derive(Debug)]
pub struct FlagStore {
    shape: StoreShape,
    cells: AtomicLattice,
    rows: AtomicLattice,
    resets: AtomicLattice,
    row_resets: AtomicLattice,
    loaded: Vec<bool>,
    cursor: usize,
    seen: Option<usize>,
    restarts: usize,
}

impl FlagStore {
    /// Allocate a zeroed store.
    ///
    /// Callers check [`estimate_memory_use`] against their
    /// [`MemoryBudget`] first; `init` never truncates a shape.
    pub fn init(shape: StoreShape) -> Result<Self> {
        if shape.channels == 0 || shape.baselines == 0 || shape.times == 0 {
            return Err(FlagError::InvalidShape(format!(
                "flag store needs at least one channel, baseline and time slot, got {:?}",
                shape
            )));
        }
        let cell_count = shape.cell_count().ok_or_else(|| {
            FlagError::InvalidShape(format!("flag store shape {:?} overflows", shape))
        })?;
        let row_count = shape.row_count().ok_or_else(|| {
            FlagError::InvalidShape(format!("flag store shape {:?} overflows", shape))
        })?;

        log::debug!(
            "Allocating flag store: {} channels x {} baselines x {} times ({} bytes)",
            shape.channels,
            shape.baselines,
            shape.times,
            estimate_memory_use(shape.channels, shape.baselines, shape.times)
        );

        Ok(Self {
            shape,
            cells: AtomicLattice::zeroed(cell_count),
            rows: AtomicLattice::zeroed(row_count),
            resets: AtomicLattice::zeroed(cell_count),
            row_resets: AtomicLattice::zeroed(row_count),
            loaded: vec![false; shape.times],
            cursor: 0,
            seen: None,
            restarts: 0,
        })
    }

    /// Check the budget, then allocate.
    pub fn init_within(shape: StoreShape, budget: &MemoryBudget) -> Result<Self> {
        budget.check(shape)?;
        Self::init(shape)
    }

    pub fn shape(&self) -> StoreShape {
        self.shape
    }

    /// Active time slot.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// How many times the store was reallocated by an out-of-order advance.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Whether slot `time` has had its pre-existing flags loaded.
    pub fn is_loaded(&self, time: usize) -> bool {
        self.loaded.get(time).copied().unwrap_or(false)
    }

    // --- Cursor ---

    /// Move the cursor to `time`, loading the slot from `source` the first
    /// time it is visited.
    ///
    /// A `time` lower than the previously seen index is a chunk restart: the
    /// storage is discarded and reallocated with the same shape before the
    /// cursor moves. Repeated advances to an already-loaded slot do not
    /// reload it.
    pub fn advance(&mut self, time: usize, source: Option<&dyn SlotLoader>) -> Result<Advance> {
        self.check_time(time)?;

        let restarted = matches!(self.seen, Some(prev) if time < prev);
        if restarted {
            log::warn!(
                "Time cursor moved back from {} to {}; restarting chunk storage",
                self.seen.unwrap_or_default(),
                time
            );
            self.reset();
            self.restarts += 1;
        }

        self.cursor = time;
        self.seen = Some(time);

        let mut loaded = false;
        if let Some(source) = source {
            if !self.loaded[time] {
                let mut writer = SlotWriter::new(self, time);
                source.load(&mut writer)?;
                self.loaded[time] = true;
                loaded = true;
            }
        }

        Ok(match (restarted, loaded) {
            (true, loaded) => Advance::Restarted { loaded },
            (false, true) => Advance::Loaded,
            (false, false) => Advance::Positioned,
        })
    }

    /// Discard all flags and resets, keeping the shape.
    fn reset(&mut self) {
        self.cells = AtomicLattice::zeroed(self.cells.len());
        self.rows = AtomicLattice::zeroed(self.rows.len());
        self.resets = AtomicLattice::zeroed(self.resets.len());
        self.row_resets = AtomicLattice::zeroed(self.row_resets.len());
        self.loaded.iter_mut().for_each(|l| *l = false);
    }

    // --- Indexing ---

    fn check_time(&self, time: usize) -> Result<()> {
        if time >= self.shape.times {
            return Err(FlagError::InvalidShape(format!(
                "time slot {} outside chunk of {} slots",
                time, self.shape.times
            )));
        }
        Ok(())
    }

    /// Offset of an in-range cell.
    #[inline]
    fn cell_offset(&self, channel: usize, baseline: usize, time: usize) -> usize {
        (time * self.shape.baselines + baseline) * self.shape.channels + channel
    }

    /// Offset of an in-range row.
    #[inline]
    fn row_offset(&self, baseline: usize, time: usize) -> usize {
        time * self.shape.baselines + baseline
    }

    fn cell_index(&self, channel: usize, baseline: usize, time: usize) -> Result<usize> {
        if channel >= self.shape.channels || baseline >= self.shape.baselines || time >= self.shape.times {
            return Err(FlagError::InvalidShape(format!(
                "cell ({}, {}, {}) outside {:?}",
                channel, baseline, time, self.shape
            )));
        }
        Ok(self.cell_offset(channel, baseline, time))
    }

    fn row_index(&self, baseline: usize, time: usize) -> Result<usize> {
        if baseline >= self.shape.baselines || time >= self.shape.times {
            return Err(FlagError::InvalidShape(format!(
                "row ({}, {}) outside {:?}",
                baseline, time, self.shape
            )));
        }
        Ok(self.row_offset(baseline, time))
    }

    // --- Raw words ---

    /// Full word of a cell at the cursor.
    #[inline]
    pub fn word(&self, channel: usize, baseline: usize) -> Result<FlagWord> {
        self.word_at(channel, baseline, self.cursor)
    }

    /// Full word of a cell at an explicit time.
    #[inline]
    pub fn word_at(&self, channel: usize, baseline: usize, time: usize) -> Result<FlagWord> {
        Ok(self.cells.load(self.cell_index(channel, baseline, time)?))
    }

    /// Full row word.
    #[inline]
    pub fn row_word(&self, baseline: usize, time: usize) -> Result<FlagWord> {
        Ok(self.rows.load(self.row_index(baseline, time)?))
    }

    /// Correlation bits whose pre-existing flags were reset on a cell at the
    /// cursor.
    #[inline]
    pub fn reset_word(&self, channel: usize, baseline: usize) -> Result<FlagWord> {
        Ok(self.resets.load(self.cell_index(channel, baseline, self.cursor)?))
    }

    /// Row bits of the agents that reset a row's source flag.
    #[inline]
    pub fn row_reset_word(&self, baseline: usize, time: usize) -> Result<FlagWord> {
        Ok(self.row_resets.load(self.row_index(baseline, time)?))
    }

    /// Copy of all cell words of one slot, indexed `baseline * channels + channel`.
    pub fn slot_words(&self, time: usize) -> Result<Vec<FlagWord>> {
        self.check_time(time)?;
        Ok(self.cells.snapshot(self.cell_offset(0, 0, time), self.shape.slot_cells()))
    }

    /// Copy of all row words of one slot.
    pub fn slot_row_words(&self, time: usize) -> Result<Vec<FlagWord>> {
        self.check_time(time)?;
        Ok(self.rows.snapshot(self.row_offset(0, time), self.shape.baselines))
    }

    /// Copy of the cell reset words of one slot, indexed like
    /// [`slot_words`](Self::slot_words).
    pub fn slot_reset_words(&self, time: usize) -> Result<Vec<FlagWord>> {
        self.check_time(time)?;
        Ok(self.resets.snapshot(self.cell_offset(0, 0, time), self.shape.slot_cells()))
    }

    /// Copy of the row reset words of one slot.
    pub fn slot_row_reset_words(&self, time: usize) -> Result<Vec<FlagWord>> {
        self.check_time(time)?;
        Ok(self.row_resets.snapshot(self.row_offset(0, time), self.shape.baselines))
    }

    // --- Agent-scoped cell flags ---

    /// Whether the agent's bit is set in the cell at the cursor.
    #[inline]
    pub fn get_flag(&self, agent: &AgentRegistration, channel: usize, baseline: usize) -> Result<bool> {
        Ok(self.word(channel, baseline)? & agent.flag_mask() != 0)
    }

    /// Set the agent's bit (atomic OR) and return the previous word. Idempotent.
    #[inline]
    pub fn set_flag(&self, agent: &AgentRegistration, channel: usize, baseline: usize) -> Result<FlagWord> {
        let i = self.cell_index(channel, baseline, self.cursor)?;
        Ok(self.cells.fetch_or(i, agent.flag_mask()))
    }

    /// Clear the agent's bit (atomic AND-NOT) and return the previous word.
    /// Idempotent.
    #[inline]
    pub fn clear_flag(&self, agent: &AgentRegistration, channel: usize, baseline: usize) -> Result<FlagWord> {
        let i = self.cell_index(channel, baseline, self.cursor)?;
        Ok(self.cells.fetch_and_not(i, agent.flag_mask()))
    }

    /// Pre-existing flags the agent honours are set on this cell.
    #[inline]
    pub fn pre_flagged(&self, agent: &AgentRegistration, channel: usize, baseline: usize) -> Result<bool> {
        Ok(self.word(channel, baseline)? & agent.check_mask() != 0)
    }

    /// Honoured pre-existing flags, or a flag from another agent sharing a
    /// correlation, are set on this cell.
    #[inline]
    pub fn any_flagged(&self, agent: &AgentRegistration, channel: usize, baseline: usize) -> Result<bool> {
        Ok(self.word(channel, baseline)? & (agent.check_mask() | agent.cross_agent_mask()) != 0)
    }

    // --- Agent-scoped row flags ---

    #[inline]
    pub fn get_row_flag(&self, agent: &AgentRegistration, baseline: usize, time: usize) -> Result<bool> {
        Ok(self.row_word(baseline, time)? & agent.row_mask() != 0)
    }

    #[inline]
    pub fn set_row_flag(&self, agent: &AgentRegistration, baseline: usize, time: usize) -> Result<FlagWord> {
        let i = self.row_index(baseline, time)?;
        Ok(self.rows.fetch_or(i, agent.row_mask()))
    }

    #[inline]
    pub fn clear_row_flag(&self, agent: &AgentRegistration, baseline: usize, time: usize) -> Result<FlagWord> {
        let i = self.row_index(baseline, time)?;
        Ok(self.rows.fetch_and_not(i, agent.row_mask()))
    }

    /// The source has no row for this baseline and time.
    #[inline]
    pub fn row_absent(&self, baseline: usize, time: usize) -> Result<bool> {
        Ok(self.row_word(baseline, time)? & ROW_ABSENT != 0)
    }

    /// The row was flagged in the source and the agent honours that.
    #[inline]
    pub fn row_pre_flagged(&self, agent: &AgentRegistration, baseline: usize, time: usize) -> Result<bool> {
        let word = self.row_word(baseline, time)?;
        Ok(agent.honors_pre_flags() && word & ROW_FLAGGED != 0)
    }

    /// The agent itself flagged the row.
    #[inline]
    pub fn row_agent_flagged(&self, agent: &AgentRegistration, baseline: usize, time: usize) -> Result<bool> {
        self.get_row_flag(agent, baseline, time)
    }

    /// Honoured source flag, or any agent sharing a correlation (including
    /// this one) flagged the row.
    #[inline]
    pub fn row_flagged(&self, agent: &AgentRegistration, baseline: usize, time: usize) -> Result<bool> {
        let word = self.row_word(baseline, time)?;
        Ok(self.row_pre_flagged(agent, baseline, time)?
            || word & (agent.row_mask() | agent.cross_row_mask()) != 0)
    }

    // --- Patches ---

    /// Apply one agent's patch to the cursor slot with atomic per-word
    /// updates. Only the agent's own bits are touched; pending resets are
    /// recorded under the agent's correlations and row bit.
    pub fn apply_patch(&self, agent: &AgentRegistration, patch: &FlagPatch) -> Result<PatchOutcome> {
        if patch.channels() != self.shape.channels || patch.baselines() != self.shape.baselines {
            return Err(FlagError::InvalidShape(format!(
                "patch for {}x{} slot applied to {}x{} store",
                patch.channels(),
                patch.baselines(),
                self.shape.channels,
                self.shape.baselines
            )));
        }

        let mut outcome = PatchOutcome::default();
        let base = self.cell_offset(0, 0, self.cursor);
        let mask = agent.flag_mask();
        for i in patch.set_cells() {
            outcome.record_cell(self.cells.fetch_or(base + i, mask), mask, true);
        }
        for i in patch.cleared_cells() {
            outcome.record_cell(self.cells.fetch_and_not(base + i, mask), mask, false);
        }
        let dropped = agent.correlations.bits();
        for i in patch.reset_cells() {
            self.resets.fetch_or(base + i, dropped);
        }

        let row_base = self.row_offset(0, self.cursor);
        let row_mask = agent.row_mask();
        for b in patch.set_rows() {
            outcome.record_row(self.rows.fetch_or(row_base + b, row_mask), row_mask, true);
        }
        for b in patch.cleared_rows() {
            outcome.record_row(self.rows.fetch_and_not(row_base + b, row_mask), row_mask, false);
        }
        for b in patch.reset_rows() {
            self.row_resets.fetch_or(row_base + b, row_mask);
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// SlotWriter
// ---------------------------------------------------------------------------

/// Exclusive writer for one slot's pre-existing flags.
///
/// Every row of the slot starts out marked [`ROW_ABSENT`]; a loader calls
/// [`mark_row`](Self::mark_row) for each row the source actually has.
pub struct SlotWriter<'a> {
    store: &'a mut FlagStore,
    time: usize,
}

impl<'a> SlotWriter<'a> {
    fn new(store: &'a mut FlagStore, time: usize) -> Self {
        let baselines = store.shape.baselines;
        let channels = store.shape.channels;
        for b in 0..baselines {
            let ri = store.row_offset(b, time);
            store.rows.put(ri, ROW_ABSENT);
            store.row_resets.put(ri, 0);
            for c in 0..channels {
                let ci = store.cell_offset(c, b, time);
                store.cells.put(ci, 0);
                store.resets.put(ci, 0);
            }
        }
        Self { store, time }
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn shape(&self) -> StoreShape {
        self.store.shape
    }

    /// Mark a baseline's row as present, optionally flagged in the source.
    ///
    /// A second row for the same baseline keeps the first one's flag.
    pub fn mark_row(&mut self, baseline: usize, flagged: bool) -> Result<()> {
        self.check(0, baseline)?;
        let ri = self.store.row_offset(baseline, self.time);
        let mut word = self.store.rows.load(ri) & !ROW_ABSENT;
        if flagged {
            word |= ROW_FLAGGED;
        }
        self.store.rows.put(ri, word);
        Ok(())
    }

    /// Set the pre-existing flag bit of `correlation` on one cell.
    pub fn set_pre_flag(&mut self, channel: usize, baseline: usize, correlation: usize) -> Result<()> {
        self.check(channel, baseline)?;
        if correlation >= crate::types::WORD_BITS as usize {
            return Err(FlagError::InvalidShape(format!(
                "correlation {} has no pre-flag bit",
                correlation
            )));
        }
        let ci = self.store.cell_offset(channel, baseline, self.time);
        let word = self.store.cells.load(ci) | bit(correlation as u32);
        self.store.cells.put(ci, word);
        Ok(())
    }

    fn check(&self, channel: usize, baseline: usize) -> Result<()> {
        let shape = self.store.shape;
        if channel >= shape.channels || baseline >= shape.baselines {
            return Err(FlagError::InvalidShape(format!(
                "pre-flag at channel {} baseline {} outside {}x{} slot",
                channel, baseline, shape.channels, shape.baselines
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
