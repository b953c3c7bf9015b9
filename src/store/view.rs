//! The store as one agent sees it while evaluating a buffer.
//!
//! [`AgentView`] pairs a shared, read-only [`FlagStore`] with the agent's own
//! pending [`FlagPatch`]. Writes go into the patch; reads of the agent's own
//! bit see the patch first, reads of everything else see the store as it was
//! before the buffer started. A sibling's writes from the same buffer are
//! therefore never visible during `evaluate`. Once every patch of the buffer
//! is applied the dispatcher hands out fresh, empty views for the
//! [`observe`](crate::agents::Agent::observe) pass, and those read the
//! merged state.

use super::patch::FlagPatch;
use super::FlagStore;
use crate::registry::{AgentRegistration, BitRegistry};
use crate::types::{bit, FlagWord, PreFlagPolicy, ROW_FLAGGED};
use crate::utilities::errors::Result;

/// One agent's window onto the store for the current time slot.
#[derive(Debug)]
pub struct AgentView<'a> {
    store: &'a FlagStore,
    registry: &'a BitRegistry,
    agent: &'a AgentRegistration,
    patch: FlagPatch,
}

impl<'a> AgentView<'a> {
    pub fn new(store: &'a FlagStore, registry: &'a BitRegistry, agent: &'a AgentRegistration) -> Self {
        let shape = store.shape();
        Self {
            store,
            registry,
            agent,
            patch: FlagPatch::new(shape.channels, shape.baselines),
        }
    }

    /// The agent this view writes for.
    pub fn agent(&self) -> &AgentRegistration {
        self.agent
    }

    /// Time slot being evaluated.
    pub fn time(&self) -> usize {
        self.store.cursor()
    }

    pub fn channels(&self) -> usize {
        self.store.shape().channels
    }

    pub fn baselines(&self) -> usize {
        self.store.shape().baselines
    }

    /// Raw store word, without this agent's pending writes.
    pub fn word(&self, channel: usize, baseline: usize) -> Result<FlagWord> {
        self.store.word(channel, baseline)
    }

    // --- Own bit ---

    pub fn get_flag(&self, channel: usize, baseline: usize) -> Result<bool> {
        let stored = self.store.get_flag(self.agent, channel, baseline)?;
        Ok(self.patch.cell_state(channel, baseline).unwrap_or(stored))
    }

    pub fn set_flag(&mut self, channel: usize, baseline: usize) -> Result<()> {
        self.patch.set(channel, baseline)
    }

    pub fn clear_flag(&mut self, channel: usize, baseline: usize) -> Result<()> {
        self.patch.clear(channel, baseline)
    }

    pub fn get_row_flag(&self, baseline: usize) -> Result<bool> {
        let stored = self.store.get_row_flag(self.agent, baseline, self.time())?;
        Ok(self.patch.row_state(baseline).unwrap_or(stored))
    }

    pub fn set_row_flag(&mut self, baseline: usize) -> Result<()> {
        self.patch.set_row(baseline)
    }

    pub fn clear_row_flag(&mut self, baseline: usize) -> Result<()> {
        self.patch.clear_row(baseline)
    }

    // --- Resets ---

    /// Drop the cell's pre-existing flags for this agent's correlations when
    /// the buffer is flushed. Only recorded under [`PreFlagPolicy::Reset`];
    /// other policies keep source flags and this is a no-op.
    pub fn reset_pre_flags(&mut self, channel: usize, baseline: usize) -> Result<()> {
        if self.agent.policy == PreFlagPolicy::Reset {
            self.patch.reset(channel, baseline)
        } else {
            self.store.word(channel, baseline).map(|_| ())
        }
    }

    /// Drop the row's pre-existing flag at flush, same policy rule as
    /// [`reset_pre_flags`](Self::reset_pre_flags).
    pub fn reset_row_pre_flag(&mut self, baseline: usize) -> Result<()> {
        if self.agent.policy == PreFlagPolicy::Reset {
            self.patch.reset_row(baseline)
        } else {
            self.store.row_word(baseline, self.time()).map(|_| ())
        }
    }

    // --- Shared state, as of the start of the buffer ---

    pub fn pre_flagged(&self, channel: usize, baseline: usize) -> Result<bool> {
        self.store.pre_flagged(self.agent, channel, baseline)
    }

    pub fn any_flagged(&self, channel: usize, baseline: usize) -> Result<bool> {
        self.store.any_flagged(self.agent, channel, baseline)
    }

    pub fn row_absent(&self, baseline: usize) -> Result<bool> {
        self.store.row_absent(baseline, self.time())
    }

    pub fn row_pre_flagged(&self, baseline: usize) -> Result<bool> {
        self.store.row_pre_flagged(self.agent, baseline, self.time())
    }

    pub fn row_agent_flagged(&self, baseline: usize) -> Result<bool> {
        self.get_row_flag(baseline)
    }

    pub fn row_flagged(&self, baseline: usize) -> Result<bool> {
        let word = self.store.row_word(baseline, self.time())?;
        Ok(self.get_row_flag(baseline)?
            || self.row_pre_flagged(baseline)?
            || word & self.agent.cross_row_mask() != 0)
    }

    /// Whether the sample of `correlation` in this cell would be flushed as
    /// flagged given the store as it stands. Pending writes of this view are
    /// not included.
    pub fn sample_flagged(&self, correlation: usize, channel: usize, baseline: usize) -> Result<bool> {
        let word = self.store.word(channel, baseline)?;
        let reset = self.store.reset_word(channel, baseline)?;
        Ok(sample_flagged(self.registry, word, reset, correlation))
    }

    /// Whether the row would be flushed as flagged, same rule as
    /// [`sample_flagged`](Self::sample_flagged).
    pub fn row_flagged_now(&self, baseline: usize) -> Result<bool> {
        let word = self.store.row_word(baseline, self.time())?;
        let reset = self.store.row_reset_word(baseline, self.time())?;
        Ok(row_flagged(self.registry, word, reset))
    }

    /// Hand the pending writes back to the dispatcher.
    pub fn into_patch(self) -> FlagPatch {
        self.patch
    }
}

/// Resolve one sample from a cell word and its reset word.
///
/// A source flag survives unless a `Reset` agent dropped it on this cell or
/// an unflagger raised its bit here. Any flagging agent's bit wins.
pub(crate) fn sample_flagged(registry: &BitRegistry, word: FlagWord, reset: FlagWord, correlation: usize) -> bool {
    if correlation >= registry.correlation_count() {
        return false;
    }
    let pre = bit(correlation as u32);
    let source_kept = word & pre != 0
        && reset & pre == 0
        && word & registry.unflaggers_covering(correlation) == 0;
    source_kept || word & registry.agents_covering(correlation) != 0
}

/// Resolve a row from a row word and its reset word.
pub(crate) fn row_flagged(registry: &BitRegistry, word: FlagWord, reset: FlagWord) -> bool {
    let source_kept = word & ROW_FLAGGED != 0 && reset == 0 && word & registry.row_unflag_mask() == 0;
    source_kept || word & registry.row_flag_mask() != 0
}
