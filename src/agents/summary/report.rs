//! Finalized summary.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::counters::SummaryCounters;
use crate::types::FlagCounts;
use crate::utilities::config::SummaryConfig;

/// Hierarchical flagged/total statistics of one summary agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub name: String,
    pub flagged: u64,
    pub total: u64,
    /// dimension → value → counts; includes `spw:channel` and
    /// `spw:correlation` when those breakdowns are enabled.
    #[serde(flatten)]
    pub dimensions: BTreeMap<String, BTreeMap<String, FlagCounts>>,
}

impl SummaryReport {
    pub fn new(name: impl Into<String>, total: FlagCounts) -> Self {
        Self {
            name: name.into(),
            flagged: total.flagged,
            total: total.total,
            dimensions: BTreeMap::new(),
        }
    }

    /// Build from raw counters, dropping buckets outside the filters.
    /// The grand total is never filtered.
    pub fn from_counters(name: impl Into<String>, counters: &SummaryCounters, config: &SummaryConfig) -> Self {
        let mut report = Self::new(name, counters.total());
        for (dimension, buckets) in counters.dimensions() {
            let kept: BTreeMap<String, FlagCounts> = buckets
                .iter()
                .filter(|(_, counts)| passes(counts, config))
                .map(|(value, counts)| (value.clone(), *counts))
                .collect();
            report.dimensions.insert(dimension.to_string(), kept);
        }
        report
    }

    pub fn counts(&self) -> FlagCounts {
        FlagCounts::of(self.flagged, self.total)
    }

    pub fn dimension(&self, name: &str) -> Option<&BTreeMap<String, FlagCounts>> {
        self.dimensions.get(name)
    }

    pub fn bucket(&self, dimension: &str, value: &str) -> Option<FlagCounts> {
        self.dimensions.get(dimension)?.get(value).copied()
    }

    /// One line per leaf bucket, then the grand total.
    ///
    /// The percentage is left out of lines whose bucket has no samples.
    pub fn leaf_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (dimension, buckets) in &self.dimensions {
            for (value, counts) in buckets {
                lines.push(line(&format!("{} {} {}", self.name, dimension, value), counts));
            }
        }
        lines.push(line(&format!("{} total", self.name), &self.counts()));
        lines
    }

    /// Emit [`leaf_lines`](Self::leaf_lines) at info level.
    pub fn log(&self) {
        for l in self.leaf_lines() {
            log::info!("{}", l);
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), json!("summary"));
        map.insert("name".to_string(), json!(self.name));
        map.insert("flagged".to_string(), json!(self.flagged));
        map.insert("total".to_string(), json!(self.total));
        for (dimension, buckets) in &self.dimensions {
            let inner: Map<String, Value> = buckets
                .iter()
                .map(|(value, c)| (value.clone(), json!({ "flagged": c.flagged, "total": c.total })))
                .collect();
            map.insert(dimension.clone(), Value::Object(inner));
        }
        Value::Object(map)
    }
}

fn passes(counts: &FlagCounts, config: &SummaryConfig) -> bool {
    let fraction = counts.fraction().unwrap_or(0.0);
    fraction >= config.minrel
        && fraction <= config.maxrel
        && counts.flagged >= config.minabs
        && config.maxabs.map_or(true, |max| counts.flagged <= max)
}

fn line(label: &str, counts: &FlagCounts) -> String {
    match counts.percentage_string() {
        Some(pct) => format!("{}: {} of {} flagged ({})", label, counts.flagged, counts.total, pct),
        None => format!("{}: {} of {} flagged", label, counts.flagged, counts.total),
    }
}
