//! Flagging agents.
//!
//! An agent is one flagging criterion. The dispatcher runs every active agent
//! over each buffer; an agent reads the store through its [`AgentView`] and
//! records set/clear operations on its own bit there. It never sees another
//! agent's writes from the same buffer while evaluating. Agents that need
//! the merged result of a buffer, such as the summary, read it in
//! [`Agent::observe`], which runs after every patch of the buffer is applied.
//!
//! Two agents ship with the crate: [`ManualAgent`] (flag or unflag a
//! selection) and [`SummaryAgent`] (count what is flagged).

pub mod manual;
pub mod summary;

pub use manual::{ManualAgent, ManualMode, Selection};
pub use summary::{SummaryAccumulator, SummaryAgent, SummaryReport};

use std::fmt;

use crate::report::FlagReport;
use crate::source::{Buffer, ChunkMeta};
use crate::store::AgentView;
use crate::types::{AgentRole, CorrelationMask, PreFlagPolicy};
use crate::utilities::errors::Result;

/// A flagging criterion.
///
/// `evaluate` takes `&self` because agents run concurrently on one buffer;
/// agents that keep running state use interior mutability for it. The
/// chunk hooks run between buffers and get `&mut self`.
pub trait Agent: Send + Sync + fmt::Debug {
    /// Unique name, used for the bit registration and in logs.
    fn name(&self) -> &str;

    /// Correlations the agent evaluates; `None` means all selected ones.
    fn correlations(&self) -> Option<CorrelationMask> {
        None
    }

    fn policy(&self) -> PreFlagPolicy {
        PreFlagPolicy::Honor
    }

    fn role(&self) -> AgentRole {
        AgentRole::Flag
    }

    /// Called when a chunk starts. Returning `false` makes the agent
    /// inactive for that chunk.
    fn new_chunk(&mut self, meta: &ChunkMeta) -> bool {
        let _ = meta;
        true
    }

    /// Evaluate one buffer, recording writes through `view`.
    ///
    /// On error the writes recorded in `view` are discarded.
    fn evaluate(&self, view: &mut AgentView<'_>, buffer: &Buffer, meta: &ChunkMeta) -> Result<()>;

    /// Look at the buffer once every agent's writes are applied, before it
    /// is flushed. Not called for an agent whose `evaluate` failed on this
    /// buffer. Writes recorded here are discarded.
    fn observe(&self, view: &AgentView<'_>, buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
        let _ = (view, buffer, meta);
        Ok(())
    }

    /// Called after the chunk's last buffer was flushed.
    fn end_chunk(&mut self, meta: &ChunkMeta) {
        let _ = meta;
    }

    /// Final report, gathered by the engine after the run.
    fn report(&self) -> FlagReport {
        FlagReport::Empty
    }
}
