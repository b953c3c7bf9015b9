//! Chunk and buffer model, and the traits the engine reads and writes through.
//!
//! A [`Chunk`] is a run of buffers that share array, field, spw, scan and
//! observation identifiers. Its [`ChunkMeta`] fixes the flag store shape.
//! Each [`Buffer`] holds one time slot's rows.
//!
//! The table layer that actually reads and persists data lives behind
//! [`ChunkSource`] and [`FlagSink`]; [`memory`] provides an in-memory pair.

pub mod memory;

pub use memory::{FlushRecord, MemorySink, MemorySource};

use serde::{Deserialize, Serialize};

use crate::store::{SlotLoader, SlotWriter, StoreShape};
use crate::utilities::errors::{FlagError, Result};

// ---------------------------------------------------------------------------
// ChunkMeta
// ---------------------------------------------------------------------------

/// Identifiers and shape shared by every buffer of a chunk.
///
/// Passed explicitly into every operation that needs chunk context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Position of the chunk in the run.
    pub index: usize,
    pub array_id: u32,
    pub field_id: u32,
    pub field_name: String,
    pub spw_id: u32,
    pub observation_id: u32,
    pub scan: u32,
    /// Antenna names, indexed by antenna id.
    pub antenna_names: Vec<String>,
    /// Selected correlations in bit order (correlation `k` owns pre-flag bit `k`).
    pub correlation_names: Vec<String>,
    pub channels: usize,
    /// Number of time slots in the chunk.
    pub times: usize,
}

impl ChunkMeta {
    pub fn new(
        index: usize,
        antenna_names: Vec<String>,
        correlation_names: Vec<String>,
        channels: usize,
        times: usize,
    ) -> Self {
        Self {
            index,
            array_id: 0,
            field_id: 0,
            field_name: String::new(),
            spw_id: 0,
            observation_id: 0,
            scan: 0,
            antenna_names,
            correlation_names,
            channels,
            times,
        }
    }

    pub fn with_array(mut self, array_id: u32) -> Self {
        self.array_id = array_id;
        self
    }

    pub fn with_field(mut self, field_id: u32, name: impl Into<String>) -> Self {
        self.field_id = field_id;
        self.field_name = name.into();
        self
    }

    pub fn with_spw(mut self, spw_id: u32) -> Self {
        self.spw_id = spw_id;
        self
    }

    pub fn with_scan(mut self, scan: u32) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_observation(mut self, observation_id: u32) -> Self {
        self.observation_id = observation_id;
        self
    }

    pub fn antenna_count(&self) -> usize {
        self.antenna_names.len()
    }

    pub fn correlation_count(&self) -> usize {
        self.correlation_names.len()
    }

    /// Baselines including autocorrelations: `n (n + 1) / 2`.
    pub fn baseline_count(&self) -> usize {
        let n = self.antenna_count();
        n * (n + 1) / 2
    }

    /// Triangular baseline index of an antenna pair, order-insensitive.
    pub fn baseline_index(&self, antenna1: usize, antenna2: usize) -> Result<usize> {
        let n = self.antenna_count();
        if antenna1 >= n || antenna2 >= n {
            return Err(FlagError::InvalidShape(format!(
                "antenna pair ({}, {}) outside array of {} antennas",
                antenna1, antenna2, n
            )));
        }
        let (lo, hi) = if antenna1 <= antenna2 {
            (antenna1, antenna2)
        } else {
            (antenna2, antenna1)
        };
        Ok(hi * (hi + 1) / 2 + lo)
    }

    pub fn antenna_name(&self, antenna: usize) -> Option<&str> {
        self.antenna_names.get(antenna).map(String::as_str)
    }

    /// Baseline label, `"EA01&&EA02"`.
    pub fn baseline_name(&self, antenna1: usize, antenna2: usize) -> String {
        format!(
            "{}&&{}",
            self.antenna_name(antenna1).unwrap_or("?"),
            self.antenna_name(antenna2).unwrap_or("?")
        )
    }

    /// Position of `(correlation, channel)` in a row's sample grid.
    #[inline]
    pub fn sample_index(&self, correlation: usize, channel: usize) -> usize {
        channel * self.correlation_count() + correlation
    }

    /// Samples per row.
    pub fn samples_per_row(&self) -> usize {
        self.channels * self.correlation_count()
    }

    /// Flag store shape for this chunk.
    pub fn shape(&self) -> StoreShape {
        StoreShape::new(self.channels, self.baseline_count(), self.times)
    }

    /// Whether two chunks share every grouping identifier.
    pub fn same_grouping(&self, other: &ChunkMeta) -> bool {
        self.array_id == other.array_id
            && self.field_id == other.field_id
            && self.spw_id == other.spw_id
            && self.scan == other.scan
            && self.observation_id == other.observation_id
    }
}

// ---------------------------------------------------------------------------
// Rows and buffers
// ---------------------------------------------------------------------------

/// One row of a buffer: an antenna pair at one time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub antenna1: usize,
    pub antenna2: usize,
    /// Scan of this row; may differ from the chunk's scan.
    pub scan: u32,
    /// Pre-existing sample flags, indexed by [`ChunkMeta::sample_index`].
    pub flags: Vec<bool>,
    /// Pre-existing row flag.
    pub row_flag: bool,
    /// Sample values, same layout as `flags`.
    pub values: Vec<f32>,
}

impl Row {
    /// An unflagged row of zero-valued samples.
    pub fn new(antenna1: usize, antenna2: usize, scan: u32, meta: &ChunkMeta) -> Self {
        let samples = meta.samples_per_row();
        Self {
            antenna1,
            antenna2,
            scan,
            flags: vec![false; samples],
            row_flag: false,
            values: vec![0.0; samples],
        }
    }

    pub fn is_autocorrelation(&self) -> bool {
        self.antenna1 == self.antenna2
    }

    pub fn flag(&self, meta: &ChunkMeta, correlation: usize, channel: usize) -> bool {
        self.flags
            .get(meta.sample_index(correlation, channel))
            .copied()
            .unwrap_or(false)
    }

    pub fn value(&self, meta: &ChunkMeta, correlation: usize, channel: usize) -> Option<f32> {
        self.values.get(meta.sample_index(correlation, channel)).copied()
    }
}

/// One time step's rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    /// Time slot within the chunk.
    pub time_index: usize,
    pub rows: Vec<Row>,
}

impl Buffer {
    pub fn new(time_index: usize, rows: Vec<Row>) -> Self {
        Self { time_index, rows }
    }

    /// Check the rows against the chunk shape.
    pub fn validate(&self, meta: &ChunkMeta) -> Result<()> {
        if self.time_index >= meta.times {
            return Err(FlagError::InvalidShape(format!(
                "buffer time {} outside chunk of {} slots",
                self.time_index, meta.times
            )));
        }
        let samples = meta.samples_per_row();
        for (i, row) in self.rows.iter().enumerate() {
            meta.baseline_index(row.antenna1, row.antenna2)?;
            if row.flags.len() != samples {
                return Err(FlagError::InvalidShape(format!(
                    "row {} of buffer {} has {} flags, expected {}",
                    i,
                    self.time_index,
                    row.flags.len(),
                    samples
                )));
            }
        }
        Ok(())
    }

    /// Loader that writes this buffer's pre-existing flags into a store slot.
    pub fn loader<'a>(&'a self, meta: &'a ChunkMeta) -> BufferLoader<'a> {
        BufferLoader { buffer: self, meta }
    }
}

/// [`SlotLoader`] over a buffer and its chunk metadata.
pub struct BufferLoader<'a> {
    buffer: &'a Buffer,
    meta: &'a ChunkMeta,
}

impl SlotLoader for BufferLoader<'_> {
    fn load(&self, slot: &mut SlotWriter<'_>) -> Result<()> {
        let meta = self.meta;
        for row in &self.buffer.rows {
            let baseline = meta.baseline_index(row.antenna1, row.antenna2)?;
            slot.mark_row(baseline, row.row_flag)?;
            for channel in 0..meta.channels {
                for correlation in 0..meta.correlation_count() {
                    if row.flag(meta, correlation, channel) {
                        slot.set_pre_flag(channel, baseline, correlation)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// A chunk and its buffers, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub meta: ChunkMeta,
    pub buffers: Vec<Buffer>,
}

impl Chunk {
    pub fn new(meta: ChunkMeta, buffers: Vec<Buffer>) -> Self {
        Self { meta, buffers }
    }

    pub fn row_count(&self) -> usize {
        self.buffers.iter().map(|b| b.rows.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Flushed flags
// ---------------------------------------------------------------------------

/// Output flags of one row, in buffer row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFlags {
    pub antenna1: usize,
    pub antenna2: usize,
    pub flags: Vec<bool>,
    pub row_flag: bool,
}

/// Everything written back for one buffer; handed to the sink in one piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferFlags {
    pub time_index: usize,
    pub rows: Vec<RowFlags>,
}

impl BufferFlags {
    pub fn flagged_samples(&self) -> u64 {
        self.rows
            .iter()
            .map(|r| r.flags.iter().filter(|f| **f).count() as u64)
            .sum()
    }

    pub fn flagged_rows(&self) -> u64 {
        self.rows.iter().filter(|r| r.row_flag).count() as u64
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Supplies chunks to the engine.
pub trait ChunkSource {
    /// Number of selected correlations, fixed for the whole run.
    fn correlation_count(&self) -> usize;

    /// Next chunk, or `None` when the selection is exhausted.
    fn next_chunk(&mut self) -> Result<Option<Chunk>>;
}

/// Persists flushed flags.
pub trait FlagSink {
    fn flush(&mut self, meta: &ChunkMeta, flags: BufferFlags) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Advance, FlagStore};
    use crate::types::ROW_FLAGGED;

    fn meta() -> ChunkMeta {
        ChunkMeta::new(
            0,
            vec!["EA01".into(), "EA02".into(), "EA03".into()],
            vec!["RR".into(), "LL".into()],
            4,
            2,
        )
        .with_field(1, "3C286")
        .with_spw(2)
    }

    #[test]
    fn test_baseline_index_is_triangular() {
        let m = meta();
        assert_eq!(m.baseline_count(), 6);
        assert_eq!(m.baseline_index(0, 0).unwrap(), 0);
        assert_eq!(m.baseline_index(0, 1).unwrap(), 1);
        assert_eq!(m.baseline_index(1, 1).unwrap(), 2);
        assert_eq!(m.baseline_index(2, 0).unwrap(), 3);
        assert_eq!(m.baseline_index(2, 2).unwrap(), 5);
        assert!(m.baseline_index(3, 0).is_err());
    }

    #[test]
    fn test_baseline_name() {
        assert_eq!(meta().baseline_name(0, 2), "EA01&&EA03");
    }

    #[test]
    fn test_sample_layout() {
        let m = meta();
        assert_eq!(m.samples_per_row(), 8);
        assert_eq!(m.sample_index(1, 3), 7);
        let mut row = Row::new(0, 1, 5, &m);
        row.flags[m.sample_index(1, 2)] = true;
        assert!(row.flag(&m, 1, 2));
        assert!(!row.flag(&m, 0, 2));
    }

    #[test]
    fn test_validate() {
        let m = meta();
        let good = Buffer::new(1, vec![Row::new(0, 1, 0, &m)]);
        assert!(good.validate(&m).is_ok());
        assert!(Buffer::new(2, vec![]).validate(&m).is_err());

        let mut short = Row::new(0, 1, 0, &m);
        short.flags.pop();
        assert!(Buffer::new(0, vec![short]).validate(&m).is_err());
    }

    #[test]
    fn test_loader_fills_slot() {
        let m = meta();
        let mut row = Row::new(1, 2, 0, &m);
        row.flags[m.sample_index(0, 3)] = true;
        row.row_flag = true;
        let buffer = Buffer::new(1, vec![row]);

        let mut store = FlagStore::init(m.shape()).unwrap();
        let loader = buffer.loader(&m);
        assert_eq!(store.advance(1, Some(&loader)).unwrap(), Advance::Loaded);

        let b = m.baseline_index(1, 2).unwrap();
        assert_eq!(store.word(3, b).unwrap(), 0b01);
        assert_eq!(store.row_word(b, 1).unwrap(), ROW_FLAGGED);
        assert!(store.row_absent(0, 1).unwrap());
    }

    #[test]
    fn test_buffer_flags_counts() {
        let flags = BufferFlags {
            time_index: 0,
            rows: vec![
                RowFlags { antenna1: 0, antenna2: 1, flags: vec![true, false, true], row_flag: false },
                RowFlags { antenna1: 1, antenna2: 1, flags: vec![true; 3], row_flag: true },
            ],
        };
        assert_eq!(flags.flagged_samples(), 5);
        assert_eq!(flags.flagged_rows(), 1);
    }
}
