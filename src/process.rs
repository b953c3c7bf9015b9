//! How agents are run over a buffer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution mode, chosen once when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    /// Agents run one after another on the calling thread.
    #[default]
    Sequential,
    /// One scoped worker thread per agent, joined before the flush.
    Parallel,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Sequential => write!(f, "sequential"),
            Process::Parallel => write!(f, "parallel"),
        }
    }
}
