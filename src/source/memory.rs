//! In-memory chunk source and flag sink.
//!
//! Used by the test suite and by callers that already hold their data in
//! memory. The sink keeps every flush in arrival order as well as the latest
//! flags per (chunk, time slot).

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use super::{BufferFlags, Chunk, ChunkMeta, ChunkSource, FlagSink};
use crate::utilities::errors::{FlagError, Result};

/// Serves a fixed list of chunks.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    correlations: usize,
    chunks: VecDeque<Chunk>,
}

impl MemorySource {
    pub fn new(correlations: usize, chunks: Vec<Chunk>) -> Self {
        Self {
            correlations,
            chunks: chunks.into(),
        }
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.chunks.push_back(chunk);
    }

    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl ChunkSource for MemorySource {
    fn correlation_count(&self) -> usize {
        self.correlations
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        Ok(self.chunks.pop_front())
    }
}

/// One call to [`FlagSink::flush`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushRecord {
    pub chunk: usize,
    pub flags: BufferFlags,
}

/// Records flushed flags.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Vec<FlushRecord>,
    latest: BTreeMap<(usize, usize), BufferFlags>,
    /// Fail every flush after this many successful ones.
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects flushes once `count` have been accepted.
    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    /// Every flush, in order.
    pub fn records(&self) -> &[FlushRecord] {
        &self.records
    }

    pub fn flush_count(&self) -> usize {
        self.records.len()
    }

    /// Most recent flags written for a chunk's time slot.
    pub fn latest(&self, chunk: usize, time: usize) -> Option<&BufferFlags> {
        self.latest.get(&(chunk, time))
    }

    /// Total flagged samples across the latest flags of every slot.
    pub fn flagged_samples(&self) -> u64 {
        self.latest.values().map(BufferFlags::flagged_samples).sum()
    }
}

impl FlagSink for MemorySink {
    fn flush(&mut self, meta: &ChunkMeta, flags: BufferFlags) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if self.records.len() >= limit {
                return Err(FlagError::Sink(format!(
                    "memory sink refused flush of chunk {} time {}",
                    meta.index, flags.time_index
                )));
            }
        }
        self.latest.insert((meta.index, flags.time_index), flags.clone());
        self.records.push(FlushRecord {
            chunk: meta.index,
            flags,
        });
        Ok(())
    }
}
