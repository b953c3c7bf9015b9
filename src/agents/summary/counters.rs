//! Bucketed flagged/total counters.

use std::collections::BTreeMap;

use crate::types::FlagCounts;

pub const ARRAY: &str = "array";
pub const FIELD: &str = "field";
pub const SPW: &str = "spw";
pub const SCAN: &str = "scan";
pub const OBSERVATION: &str = "observation";
pub const ANTENNA: &str = "antenna";
pub const BASELINE: &str = "baseline";
pub const CORRELATION: &str = "correlation";
pub const SPW_CHANNEL: &str = "spw:channel";
pub const SPW_CORRELATION: &str = "spw:correlation";

/// dimension → value → counts, plus the grand total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryCounters {
    dimensions: BTreeMap<&'static str, BTreeMap<String, FlagCounts>>,
    total: FlagCounts,
}

impl SummaryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment one bucket.
    pub fn bump(&mut self, dimension: &'static str, value: impl Into<String>, flagged: u64, total: u64) {
        self.dimensions
            .entry(dimension)
            .or_default()
            .entry(value.into())
            .or_default()
            .add(flagged, total);
    }

    /// Increment the grand total.
    pub fn bump_total(&mut self, flagged: u64, total: u64) {
        self.total.add(flagged, total);
    }

    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: SummaryCounters) {
        for (dimension, buckets) in other.dimensions {
            let target = self.dimensions.entry(dimension).or_default();
            for (value, counts) in buckets {
                target.entry(value).or_default().add_counts(&counts);
            }
        }
        self.total.add_counts(&other.total);
    }

    pub fn total(&self) -> FlagCounts {
        self.total
    }

    pub fn dimension(&self, name: &str) -> Option<&BTreeMap<String, FlagCounts>> {
        self.dimensions.get(name)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&'static str, &BTreeMap<String, FlagCounts>)> {
        self.dimensions.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.total.total == 0 && self.dimensions.is_empty()
    }

    /// Sum of every bucket of one dimension.
    pub fn dimension_sum(&self, name: &str) -> FlagCounts {
        let mut sum = FlagCounts::new();
        if let Some(buckets) = self.dimensions.get(name) {
            buckets.values().for_each(|c| sum.add_counts(c));
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_and_sum() {
        let mut c = SummaryCounters::new();
        c.bump(SPW, "0", 3, 8);
        c.bump(SPW, "0", 1, 8);
        c.bump(SPW, "1", 0, 8);
        c.bump_total(4, 24);
        assert_eq!(c.dimension(SPW).unwrap()["0"], FlagCounts::of(4, 16));
        assert_eq!(c.dimension_sum(SPW), c.total());
        assert_eq!(c.dimension_sum(FIELD), FlagCounts::new());
    }

    #[test]
    fn test_merge() {
        let mut a = SummaryCounters::new();
        a.bump(ANTENNA, "EA01", 2, 4);
        a.bump_total(2, 4);
        let mut b = SummaryCounters::new();
        b.bump(ANTENNA, "EA01", 1, 4);
        b.bump(ANTENNA, "EA02", 1, 4);
        b.bump_total(1, 4);
        a.merge(b);
        assert_eq!(a.dimension(ANTENNA).unwrap()["EA01"], FlagCounts::of(3, 8));
        assert_eq!(a.dimension(ANTENNA).unwrap()["EA02"], FlagCounts::of(1, 4));
        assert_eq!(a.total(), FlagCounts::of(3, 8));
    }

    #[test]
    fn test_empty() {
        assert!(SummaryCounters::new().is_empty());
    }
}
