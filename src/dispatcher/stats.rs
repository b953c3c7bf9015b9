//! Per-agent and per-chunk flagging statistics.

use serde::Serialize;

use crate::source::{Buffer, BufferFlags, ChunkMeta};
use crate::store::PatchOutcome;
use crate::types::{AgentRole, FlagCounts};

/// Samples an agent touched within some span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentTally {
    /// Samples newly raised by the agent's bit.
    pub raised: u64,
    /// Samples whose bit the agent lowered again.
    pub lowered: u64,
    /// Samples the agent was given.
    pub samples: u64,
    /// Buffers the agent failed on.
    pub failures: u64,
}

impl AgentTally {
    fn absorb(&mut self, other: &AgentTally) {
        self.raised += other.raised;
        self.lowered += other.lowered;
        self.samples += other.samples;
        self.failures += other.failures;
    }

    pub fn counts(&self) -> FlagCounts {
        FlagCounts::of(self.raised.saturating_sub(self.lowered), self.samples)
    }
}

/// Running statistics of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub name: String,
    pub role: AgentRole,
    /// Current chunk.
    pub chunk: AgentTally,
    /// Completed chunks.
    pub run: AgentTally,
}

impl AgentStats {
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
            chunk: AgentTally::default(),
            run: AgentTally::default(),
        }
    }

    pub(crate) fn begin_chunk(&mut self) {
        self.chunk = AgentTally::default();
    }

    /// Record an applied patch. Each cell bit covers `correlations` samples.
    pub(crate) fn record(&mut self, outcome: &PatchOutcome, correlations: u64, samples: u64) {
        self.chunk.raised += outcome.cells_set * correlations;
        self.chunk.lowered += outcome.cells_cleared * correlations;
        self.chunk.samples += samples;
    }

    pub(crate) fn record_failure(&mut self, samples: u64) {
        self.chunk.failures += 1;
        self.chunk.samples += samples;
    }

    /// Fold the chunk into the run totals and log the chunk line.
    pub(crate) fn end_chunk(&mut self, meta: &ChunkMeta) {
        self.run.absorb(&self.chunk);
        self.chunk_summary(meta);
    }

    /// Everything so far, including the current chunk.
    pub fn so_far(&self) -> AgentTally {
        let mut tally = self.run;
        tally.absorb(&self.chunk);
        tally
    }

    fn verb(&self) -> &'static str {
        match self.role {
            AgentRole::Flag => "flagged",
            AgentRole::Unflag => "unflagged",
        }
    }

    pub fn chunk_summary(&self, meta: &ChunkMeta) {
        let so_far = self.run.counts();
        log::info!(
            "{}: chunk {} (spw {}, field {}): {} samples {}, data {} so far {}",
            self.name,
            meta.index,
            meta.spw_id,
            meta.field_name,
            self.chunk.counts().flagged,
            self.verb(),
            self.verb(),
            so_far.percentage_string().unwrap_or_else(|| "n/a".to_string())
        );
        if self.chunk.failures > 0 {
            log::warn!(
                "{}: {} buffer(s) of chunk {} failed and were rolled back",
                self.name,
                self.chunk.failures,
                meta.index
            );
        }
    }

    pub fn table_summary(&self) {
        let counts = self.run.counts();
        log::info!(
            "{}: {} of {} samples {} ({})",
            self.name,
            counts.flagged,
            counts.total,
            self.verb(),
            counts.percentage_string().unwrap_or_else(|| "n/a".to_string())
        );
    }
}

/// Input versus output flag counts of one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkTally {
    pub rows: u64,
    pub samples: u64,
    pub input_rows_flagged: u64,
    pub input_samples_flagged: u64,
    pub output_rows_flagged: u64,
    pub output_samples_flagged: u64,
    pub buffers: u64,
    pub restarts: u64,
}

impl ChunkTally {
    pub(crate) fn record_input(&mut self, buffer: &Buffer, meta: &ChunkMeta) {
        self.buffers += 1;
        self.rows += buffer.rows.len() as u64;
        self.samples += (buffer.rows.len() * meta.samples_per_row()) as u64;
        for row in &buffer.rows {
            if row.row_flag {
                self.input_rows_flagged += 1;
            }
            self.input_samples_flagged += row.flags.iter().filter(|f| **f).count() as u64;
        }
    }

    pub(crate) fn record_output(&mut self, flags: &BufferFlags) {
        self.output_rows_flagged += flags.flagged_rows();
        self.output_samples_flagged += flags.flagged_samples();
    }

    pub fn input(&self) -> (FlagCounts, FlagCounts) {
        (
            FlagCounts::of(self.input_rows_flagged, self.rows),
            FlagCounts::of(self.input_samples_flagged, self.samples),
        )
    }

    pub fn output(&self) -> (FlagCounts, FlagCounts) {
        (
            FlagCounts::of(self.output_rows_flagged, self.rows),
            FlagCounts::of(self.output_samples_flagged, self.samples),
        )
    }

    pub fn log(&self, meta: &ChunkMeta) {
        let line = |label: &str, (rows, samples): (FlagCounts, FlagCounts)| {
            log::info!(
                "Chunk {} {}: {} of {} rows flagged, {} of {} samples flagged ({})",
                meta.index,
                label,
                rows.flagged,
                rows.total,
                samples.flagged,
                samples.total,
                samples.percentage_string().unwrap_or_else(|| "n/a".to_string())
            );
        };
        line("Input", self.input());
        line("This run", self.output());
        if self.restarts > 0 {
            log::warn!("Chunk {} restarted {} time(s)", meta.index, self.restarts);
        }
    }
}
