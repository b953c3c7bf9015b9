//! Error types for the flagging engine.
//!
//! Setup-time failures (`CapacityExceeded`, `ResourceExceeded`) are fatal and
//! stop a run before any buffer is processed. `AgentEvaluation` is the error
//! an agent reports for one buffer; the dispatcher recovers from it locally.

use thiserror::Error;

/// Errors raised by the registry, the flag store, the dispatcher and the
/// engine run loop.
#[derive(Debug, Error)]
pub enum FlagError {
    /// The bit registry has no free bit left in the flag word.
    #[error(
        "cannot register agent '{agent}': no free flag bit ({used} of {width} bits in use, {reserved} reserved)"
    )]
    CapacityExceeded {
        agent: String,
        used: u32,
        reserved: u32,
        width: u32,
    },

    /// The flag store would need more memory than the configured ceiling.
    #[error(
        "flag store for {channels} channels x {baselines} baselines x {times} times needs {required} bytes, ceiling is {ceiling} bytes"
    )]
    ResourceExceeded {
        channels: usize,
        baselines: usize,
        times: usize,
        required: u64,
        ceiling: u64,
    },

    /// One agent failed while evaluating one buffer.
    #[error("agent '{agent}' failed on time slot {time}: {message}")]
    AgentEvaluation {
        agent: String,
        time: usize,
        message: String,
    },

    /// Coordinates or shapes that do not fit the current chunk.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Derived masks were requested before all agents were registered.
    #[error("bit registry is not sealed; register every agent before dispatching")]
    NotSealed,

    /// The bit registry is sealed and does not accept new agents.
    #[error("bit registry is sealed; agent '{0}' registered too late")]
    Sealed(String),

    /// The chunk source failed to deliver data.
    #[error("chunk source error: {0}")]
    Source(String),

    /// The flag sink failed to persist a buffer.
    #[error("flag sink error: {0}")]
    Sink(String),

    /// Configuration could not be interpreted.
    #[error("configuration error: {0}")]
    Config(String),

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlagError {
    /// Build an [`FlagError::AgentEvaluation`] from anything printable.
    pub fn evaluation(agent: impl Into<String>, time: usize, message: impl ToString) -> Self {
        FlagError::AgentEvaluation {
            agent: agent.into(),
            time,
            message: message.to_string(),
        }
    }

    /// Whether this error must stop the run.
    ///
    /// Agent failures are recovered per buffer; everything else aborts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlagError::AgentEvaluation { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlagError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
