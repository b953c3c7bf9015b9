//! Flagged/total sample counters.

use serde::{Deserialize, Serialize};

/// Flagged and total sample counts for one bucket.
///
/// Both counters only ever grow during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCounts {
    /// Number of flagged samples.
    pub flagged: u64,
    /// Number of samples seen.
    pub total: u64,
}

impl FlagCounts {
    /// Create a new empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter with explicit values.
    pub fn of(flagged: u64, total: u64) -> Self {
        Self { flagged, total }
    }

    /// Add one increment.
    pub fn add(&mut self, flagged: u64, total: u64) {
        self.flagged += flagged;
        self.total += total;
    }

    /// Add the counts of another bucket.
    pub fn add_counts(&mut self, other: &FlagCounts) {
        self.flagged += other.flagged;
        self.total += other.total;
    }

    /// Flagged fraction in `[0, 1]`, or `None` when nothing was counted.
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.flagged as f64 / self.total as f64)
        }
    }

    /// `100 × flagged / total`, or `None` when `total == 0`.
    pub fn percentage(&self) -> Option<f64> {
        self.fraction().map(|f| 100.0 * f)
    }

    /// Percentage formatted for log lines, e.g. `"12.500%"`.
    pub fn percentage_string(&self) -> Option<String> {
        self.percentage().map(|p| format!("{:.3}%", p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_string() {
        assert_eq!(FlagCounts::of(16, 16).percentage_string().as_deref(), Some("100.000%"));
        assert_eq!(FlagCounts::of(1, 8).percentage_string().as_deref(), Some("12.500%"));
        assert_eq!(FlagCounts::of(0, 3).percentage_string().as_deref(), Some("0.000%"));
    }

    #[test]
    fn test_zero_total_has_no_percentage() {
        let c = FlagCounts::new();
        assert_eq!(c.percentage(), None);
        assert_eq!(c.percentage_string(), None);
    }

    #[test]
    fn test_add_counts() {
        let mut a = FlagCounts::of(1, 4);
        a.add(2, 4);
        a.add_counts(&FlagCounts::of(3, 8));
        assert_eq!(a, FlagCounts::of(6, 16));
    }
}
