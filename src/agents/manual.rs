//! Manual selection agent.
//!
//! Flags (or unflags) every sample that matches a selection of antennas,
//! baselines, scans, channels and time slots. Spw and field selections are
//! resolved per chunk: a chunk outside them is refused.
//!
//! Under [`PreFlagPolicy::Reset`] every selected row has its pre-existing
//! flags dropped on all channels before the selected channels are flagged,
//! so the selection replaces what the source had for those rows.

use serde::{Deserialize, Serialize};

use super::Agent;
use crate::source::{Buffer, ChunkMeta, Row};
use crate::store::AgentView;
use crate::types::{AgentRole, CorrelationMask, PreFlagPolicy};
use crate::utilities::errors::Result;

/// Whether the manual agent raises or lifts flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualMode {
    #[default]
    Flag,
    Unflag,
}

/// Sample selection. An empty list selects everything on that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    /// Rows with either antenna in the list.
    pub antennas: Vec<usize>,
    /// Antenna pairs, order-insensitive.
    pub baselines: Vec<(usize, usize)>,
    pub scans: Vec<u32>,
    /// Inclusive channel ranges.
    pub channels: Vec<(usize, usize)>,
    /// Inclusive time slot ranges.
    pub times: Vec<(usize, usize)>,
    pub spws: Vec<u32>,
    pub fields: Vec<u32>,
}

impl Selection {
    /// Selects every sample.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn antennas(mut self, antennas: impl IntoIterator<Item = usize>) -> Self {
        self.antennas.extend(antennas);
        self
    }

    pub fn baseline(mut self, antenna1: usize, antenna2: usize) -> Self {
        self.baselines.push((antenna1, antenna2));
        self
    }

    pub fn scans(mut self, scans: impl IntoIterator<Item = u32>) -> Self {
        self.scans.extend(scans);
        self
    }

    pub fn channels(mut self, first: usize, last: usize) -> Self {
        self.channels.push((first, last));
        self
    }

    pub fn times(mut self, first: usize, last: usize) -> Self {
        self.times.push((first, last));
        self
    }

    pub fn spws(mut self, spws: impl IntoIterator<Item = u32>) -> Self {
        self.spws.extend(spws);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = u32>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn matches_chunk(&self, meta: &ChunkMeta) -> bool {
        (self.spws.is_empty() || self.spws.contains(&meta.spw_id))
            && (self.fields.is_empty() || self.fields.contains(&meta.field_id))
    }

    pub fn matches_time(&self, time: usize) -> bool {
        in_ranges(&self.times, time)
    }

    pub fn matches_channel(&self, channel: usize) -> bool {
        in_ranges(&self.channels, channel)
    }

    pub fn matches_row(&self, row: &Row) -> bool {
        let antenna_ok = self.antennas.is_empty()
            || self.antennas.contains(&row.antenna1)
            || self.antennas.contains(&row.antenna2);
        let baseline_ok = self.baselines.is_empty()
            || self.baselines.iter().any(|&(a, b)| {
                (a, b) == (row.antenna1, row.antenna2) || (b, a) == (row.antenna1, row.antenna2)
            });
        let scan_ok = self.scans.is_empty() || self.scans.contains(&row.scan);
        antenna_ok && baseline_ok && scan_ok
    }
}

fn in_ranges(ranges: &[(usize, usize)], value: usize) -> bool {
    ranges.is_empty() || ranges.iter().any(|&(lo, hi)| lo <= value && value <= hi)
}

/// Flags or unflags a fixed selection.
#[derive(Debug, Clone)]
pub struct ManualAgent {
    name: String,
    selection: Selection,
    mode: ManualMode,
    full_row: bool,
    correlations: Option<CorrelationMask>,
    policy: PreFlagPolicy,
}

impl ManualAgent {
    pub fn new(name: impl Into<String>, selection: Selection) -> Self {
        Self {
            name: name.into(),
            selection,
            mode: ManualMode::Flag,
            full_row: false,
            correlations: None,
            policy: PreFlagPolicy::Honor,
        }
    }

    /// Lift flags instead of raising them.
    pub fn unflag(mut self) -> Self {
        self.mode = ManualMode::Unflag;
        self.policy = PreFlagPolicy::Ignore;
        self
    }

    /// Also set (or lift) the row flag of every selected row.
    pub fn full_row(mut self, full_row: bool) -> Self {
        self.full_row = full_row;
        self
    }

    pub fn with_correlations(mut self, correlations: CorrelationMask) -> Self {
        self.correlations = Some(correlations);
        self
    }

    pub fn with_policy(mut self, policy: PreFlagPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> ManualMode {
        self.mode
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }
}

impl Agent for ManualAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn correlations(&self) -> Option<CorrelationMask> {
        self.correlations
    }

    fn policy(&self) -> PreFlagPolicy {
        self.policy
    }

    fn role(&self) -> AgentRole {
        match self.mode {
            ManualMode::Flag => AgentRole::Flag,
            ManualMode::Unflag => AgentRole::Unflag,
        }
    }

    fn new_chunk(&mut self, meta: &ChunkMeta) -> bool {
        let accepted = self.selection.matches_chunk(meta);
        if !accepted {
            log::debug!(
                "{}: chunk {} (spw {}, field {}) outside selection",
                self.name,
                meta.index,
                meta.spw_id,
                meta.field_id
            );
        }
        accepted
    }

    fn evaluate(&self, view: &mut AgentView<'_>, buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
        if !self.selection.matches_time(buffer.time_index) {
            return Ok(());
        }
        let reset = self.policy == PreFlagPolicy::Reset;
        for row in buffer.rows.iter().filter(|r| self.selection.matches_row(r)) {
            let baseline = meta.baseline_index(row.antenna1, row.antenna2)?;
            if reset {
                for channel in 0..meta.channels {
                    view.reset_pre_flags(channel, baseline)?;
                }
                view.reset_row_pre_flag(baseline)?;
            }
            for channel in (0..meta.channels).filter(|c| self.selection.matches_channel(*c)) {
                view.set_flag(channel, baseline)?;
            }
            if self.full_row {
                view.set_row_flag(baseline)?;
            }
        }
        Ok(())
    }
}
