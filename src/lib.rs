//! # redflag
//!
//! A data-flagging engine for interferometric visibility data.
//!
//! Flagging agents each own one bit of a packed per-cell flag word. For every
//! time slot of a chunk the engine runs all agents over the buffer, either
//! one after another or on scoped threads, waits for them at a barrier and
//! then writes the combined per-sample flags back through a sink. A summary
//! agent tallies flagged versus total samples by array, field, spw, scan,
//! observation, antenna, baseline and correlation.
//!
//! The main pieces:
//!
//! * [`registry::BitRegistry`] hands out agent bits and derives masks.
//! * [`store::FlagStore`] is the per-chunk bit-packed flag lattice.
//! * [`dispatcher::Dispatcher`] runs the agents over one buffer.
//! * [`agents::SummaryAgent`] accumulates the flag summary.
//! * [`engine::Engine`] drives the whole run.

pub mod agents;
pub mod dispatcher;
pub mod engine;
pub mod process;
pub mod registry;
pub mod report;
pub mod source;
pub mod store;
pub mod types;
pub mod utilities;

pub use agents::{Agent, ManualAgent, Selection, SummaryAgent, SummaryReport};
pub use engine::{CancelToken, Engine, EngineBuilder, RunSummary};
pub use process::Process;
pub use registry::BitRegistry;
pub use report::FlagReport;
pub use store::{AgentView, FlagStore};
pub use utilities::config::{EngineConfig, SummaryConfig};
pub use utilities::errors::{FlagError, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
