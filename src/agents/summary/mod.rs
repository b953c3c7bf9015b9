//! Summary agent: counts flagged samples along every grouping dimension.
//!
//! The summary agent is registered like any other agent but never writes a
//! flag. It does its counting in [`Agent::observe`], after every agent's
//! writes for the buffer are applied, so it sees exactly what is about to be
//! flushed. For each row it counts the flagged (channel, correlation)
//! samples and adds `(row_flagged, row_total)` to one bucket per dimension:
//! array, field, spw, scan (per row), observation, antenna and baseline.
//! An autocorrelation adds to its antenna bucket once, a cross-correlation
//! to both.
//!
//! Counting for a buffer happens into local counters that are merged into
//! the shared ones only when the whole buffer succeeded, so a failed buffer
//! leaves the totals untouched.

pub mod counters;
pub mod report;

pub use counters::SummaryCounters;
pub use report::SummaryReport;

use parking_lot::Mutex;

use self::counters::{
    ANTENNA, ARRAY, BASELINE, CORRELATION, FIELD, OBSERVATION, SCAN, SPW, SPW_CHANNEL,
    SPW_CORRELATION,
};
use super::Agent;
use crate::report::FlagReport;
use crate::source::{Buffer, ChunkMeta, Row};
use crate::store::AgentView;
use crate::types::CorrelationMask;
use crate::utilities::config::SummaryConfig;
use crate::utilities::errors::{FlagError, Result};

// ---------------------------------------------------------------------------
// SummaryAccumulator
// ---------------------------------------------------------------------------

/// Run-long counters behind a lock.
#[derive(Debug, Default)]
pub struct SummaryAccumulator {
    config: SummaryConfig,
    counters: Mutex<SummaryCounters>,
}

impl SummaryAccumulator {
    pub fn new(config: SummaryConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(SummaryCounters::new()),
        }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Count one buffer's rows.
    pub fn accumulate(&self, view: &AgentView<'_>, buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
        let correlations: Vec<usize> = view
            .agent()
            .correlations
            .indices()
            .filter(|k| *k < meta.correlation_count())
            .collect();

        let parts = self.config.parallel_rows;
        let counted = if parts > 1 && buffer.rows.len() > 1 {
            self.count_parallel(view, &buffer.rows, meta, &correlations, parts)?
        } else {
            let mut local = SummaryCounters::new();
            self.count_rows(view, &buffer.rows, meta, &correlations, &mut local)?;
            local
        };

        self.counters.lock().merge(counted);
        Ok(())
    }

    /// Split the rows over scoped threads; each part's counters are merged
    /// into a buffer-local total under a lock.
    fn count_parallel(
        &self,
        view: &AgentView<'_>,
        rows: &[Row],
        meta: &ChunkMeta,
        correlations: &[usize],
        parts: usize,
    ) -> Result<SummaryCounters> {
        let merged = Mutex::new(SummaryCounters::new());
        let part_len = rows.len().div_ceil(parts);

        std::thread::scope(|scope| {
            let handles: Vec<_> = rows
                .chunks(part_len)
                .map(|part| {
                    let merged = &merged;
                    scope.spawn(move || -> Result<()> {
                        let mut local = SummaryCounters::new();
                        self.count_rows(view, part, meta, correlations, &mut local)?;
                        merged.lock().merge(local);
                        Ok(())
                    })
                })
                .collect();

            let mut outcome = Ok(());
            for handle in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(FlagError::evaluation(
                        view.agent().name.clone(),
                        view.time(),
                        "row counting thread panicked",
                    ))
                });
                if outcome.is_ok() {
                    outcome = result;
                }
            }
            outcome
        })?;

        Ok(merged.into_inner())
    }

    fn count_rows(
        &self,
        view: &AgentView<'_>,
        rows: &[Row],
        meta: &ChunkMeta,
        correlations: &[usize],
        counters: &mut SummaryCounters,
    ) -> Result<()> {
        let config = &self.config;
        let channels = meta.channels;
        let row_total = (channels * correlations.len()) as u64;
        let mut per_correlation = vec![0u64; correlations.len()];
        let mut per_channel = vec![0u64; channels];

        for row in rows {
            let baseline = meta.baseline_index(row.antenna1, row.antenna2)?;
            per_correlation.iter_mut().for_each(|n| *n = 0);
            per_channel.iter_mut().for_each(|n| *n = 0);

            let mut row_flagged = 0u64;
            for channel in 0..channels {
                for (i, &k) in correlations.iter().enumerate() {
                    if view.sample_flagged(k, channel, baseline)? {
                        row_flagged += 1;
                        per_correlation[i] += 1;
                        per_channel[channel] += 1;
                    }
                }
            }

            counters.bump_total(row_flagged, row_total);
            counters.bump(ARRAY, meta.array_id.to_string(), row_flagged, row_total);
            counters.bump(FIELD, meta.field_name.clone(), row_flagged, row_total);
            counters.bump(SPW, meta.spw_id.to_string(), row_flagged, row_total);
            counters.bump(SCAN, row.scan.to_string(), row_flagged, row_total);
            counters.bump(OBSERVATION, meta.observation_id.to_string(), row_flagged, row_total);

            let name1 = meta.antenna_name(row.antenna1).unwrap_or("?");
            counters.bump(ANTENNA, name1, row_flagged, row_total);
            if !row.is_autocorrelation() {
                let name2 = meta.antenna_name(row.antenna2).unwrap_or("?");
                counters.bump(ANTENNA, name2, row_flagged, row_total);
            }
            if config.basecnt {
                counters.bump(
                    BASELINE,
                    meta.baseline_name(row.antenna1, row.antenna2),
                    row_flagged,
                    row_total,
                );
            }

            for (i, &k) in correlations.iter().enumerate() {
                let name = meta.correlation_names.get(k).map(String::as_str).unwrap_or("?");
                if config.correlation {
                    counters.bump(CORRELATION, name, per_correlation[i], channels as u64);
                }
                if config.spwcorr {
                    counters.bump(
                        SPW_CORRELATION,
                        format!("{}:{}", meta.spw_id, name),
                        per_correlation[i],
                        channels as u64,
                    );
                }
            }
            if config.spwchan {
                for (channel, flagged) in per_channel.iter().enumerate() {
                    counters.bump(
                        SPW_CHANNEL,
                        format!("{}:{}", meta.spw_id, channel),
                        *flagged,
                        correlations.len() as u64,
                    );
                }
            }
        }
        Ok(())
    }

    /// Copy of the current counters.
    pub fn counters(&self) -> SummaryCounters {
        self.counters.lock().clone()
    }

    /// Report the counters so far. Does not change them, so it can be
    /// called any number of times.
    pub fn finalize(&self, name: &str) -> SummaryReport {
        let counters = self.counters.lock().clone();
        let report = SummaryReport::from_counters(name, &counters, &self.config);
        report.log();
        report
    }

    /// Drop every count.
    pub fn reset(&self) {
        *self.counters.lock() = SummaryCounters::new();
    }
}

// ---------------------------------------------------------------------------
// SummaryAgent
// ---------------------------------------------------------------------------

/// Agent wrapper around a [`SummaryAccumulator`].
#[derive(Debug)]
pub struct SummaryAgent {
    name: String,
    correlations: Option<CorrelationMask>,
    accumulator: SummaryAccumulator,
}

impl SummaryAgent {
    pub fn new(name: impl Into<String>, config: SummaryConfig) -> Self {
        Self {
            name: name.into(),
            correlations: None,
            accumulator: SummaryAccumulator::new(config),
        }
    }

    /// Count only these correlations.
    pub fn with_correlations(mut self, correlations: CorrelationMask) -> Self {
        self.correlations = Some(correlations);
        self
    }

    pub fn accumulator(&self) -> &SummaryAccumulator {
        &self.accumulator
    }

    pub fn finalize(&self) -> SummaryReport {
        self.accumulator.finalize(&self.name)
    }
}

impl Agent for SummaryAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn correlations(&self) -> Option<CorrelationMask> {
        self.correlations
    }

    fn evaluate(&self, _view: &mut AgentView<'_>, _buffer: &Buffer, _meta: &ChunkMeta) -> Result<()> {
        Ok(())
    }

    fn observe(&self, view: &AgentView<'_>, buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
        self.accumulator.accumulate(view, buffer, meta)
    }

    fn end_chunk(&mut self, meta: &ChunkMeta) {
        let total = self.accumulator.counters().total();
        log::debug!(
            "{}: chunk {} done, {} of {} samples flagged so far",
            self.name,
            meta.index,
            total.flagged,
            total.total
        );
    }

    fn report(&self) -> FlagReport {
        FlagReport::Summary(self.finalize())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
