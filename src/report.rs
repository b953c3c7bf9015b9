//! Report envelope returned by agents at the end of a run.
//!
//! The JSON form mirrors what the table-level tools expect: a summary is an
//! object with `"type": "summary"`, a list is an object with `"type": "list"`
//! and one `reportN` key per entry.

use serde_json::{json, Map, Value};

use crate::agents::summary::SummaryReport;

/// What an agent hands back after the last chunk.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlagReport {
    /// The agent has nothing to report.
    #[default]
    Empty,
    /// Flagged/total statistics.
    Summary(SummaryReport),
    /// Reports gathered from several agents, in registration order.
    List(Vec<FlagReport>),
}

impl FlagReport {
    /// Gather reports into a list, dropping empty ones.
    pub fn gather(reports: impl IntoIterator<Item = FlagReport>) -> Self {
        FlagReport::List(reports.into_iter().filter(|r| !r.is_empty()).collect())
    }

    /// `"none"`, `"summary"` or `"list"`.
    pub fn kind(&self) -> &'static str {
        match self {
            FlagReport::Empty => "none",
            FlagReport::Summary(_) => "summary",
            FlagReport::List(_) => "list",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FlagReport::Empty => true,
            FlagReport::Summary(_) => false,
            FlagReport::List(items) => items.iter().all(FlagReport::is_empty),
        }
    }

    /// Every summary in the report, depth first.
    pub fn summaries(&self) -> Vec<&SummaryReport> {
        match self {
            FlagReport::Empty => Vec::new(),
            FlagReport::Summary(summary) => vec![summary],
            FlagReport::List(items) => items.iter().flat_map(FlagReport::summaries).collect(),
        }
    }

    /// Summary produced by the agent named `name`, if any.
    pub fn summary(&self, name: &str) -> Option<&SummaryReport> {
        self.summaries().into_iter().find(|s| s.name == name)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FlagReport::Empty => json!({ "type": "none" }),
            FlagReport::Summary(summary) => summary.to_json(),
            FlagReport::List(items) => {
                let mut map = Map::new();
                map.insert("type".to_string(), json!("list"));
                for (i, item) in items.iter().enumerate() {
                    map.insert(format!("report{}", i), item.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

impl From<SummaryReport> for FlagReport {
    fn from(summary: SummaryReport) -> Self {
        FlagReport::Summary(summary)
    }
}
