//! Logger setup.
//!
//! The library only talks to the `log` facade. Binaries and tests that want
//! output call [`Logger::init`] (or [`init`]) once; `RUST_LOG` always wins
//! over the default filter.

use serde::{Deserialize, Serialize};

/// `env_logger` settings for a flagging run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Logger {
    /// Log chunk progress and per-agent statistics (`info`) instead of only
    /// problems (`warn`).
    pub verbose: bool,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        if self.verbose {
            "info"
        } else {
            "warn"
        }
    }

    /// Install the logger on stderr. Returns `false` when a logger was
    /// already installed.
    pub fn init(&self) -> bool {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(self.default_filter()))
            .target(env_logger::Target::Stderr)
            .format_timestamp_millis()
            .try_init()
            .is_ok()
    }
}

/// Install a verbose logger.
pub fn init() -> bool {
    Logger::new(true).init()
}
