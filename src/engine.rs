//! Engine: the run loop over chunks.
//!
//! The engine owns the registered agents, the sealed [`BitRegistry`] and the
//! execution strategy. [`Engine::run`] pulls chunks from a [`ChunkSource`],
//! builds a [`Dispatcher`] per chunk, dispatches and resolves every buffer
//! and hands the result to a [`FlagSink`]. Setup failures (bit capacity,
//! memory ceiling) stop the run before the affected chunk's first buffer.
//!
//! ```no_run
//! use redflag::agents::{ManualAgent, Selection};
//! use redflag::engine::EngineBuilder;
//! use redflag::source::{MemorySink, MemorySource};
//! use redflag::utilities::config::EngineConfig;
//!
//! # fn main() -> redflag::Result<()> {
//! let mut engine = EngineBuilder::new(EngineConfig::default())
//!     .agent(ManualAgent::new("edge", Selection::all().channels(0, 3)))
//!     .summary("summary")
//!     .build(2)?;
//! let mut source = MemorySource::new(2, Vec::new());
//! let mut sink = MemorySink::new();
//! let outcome = engine.run(&mut source, &mut sink)?;
//! println!("{}", outcome.report.to_json());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::agents::{Agent, SummaryAgent};
use crate::dispatcher::{strategy_for, AgentStats, Dispatcher, ExecutionStrategy};
use crate::registry::BitRegistry;
use crate::report::FlagReport;
use crate::source::{Chunk, ChunkSource, FlagSink};
use crate::store::MemoryBudget;
use crate::types::CorrelationMask;
use crate::utilities::config::EngineConfig;
use crate::utilities::errors::{FlagError, Result};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation shared between the engine and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop. Already flushed buffers stay valid.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// What one [`Engine::run`] call did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub chunks: u64,
    pub buffers: u64,
    /// Buffers handed to the sink; zero in trial mode.
    pub flushed: u64,
    pub restarts: u64,
    /// Agent evaluations that failed and were rolled back.
    pub agent_failures: u64,
    #[serde(skip)]
    pub report: FlagReport,
}

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

/// Collects agents and registers them in order.
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    agents: Vec<Box<dyn Agent>>,
    cancel: CancelToken,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            agents: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn agent(self, agent: impl Agent + 'static) -> Self {
        self.boxed(Box::new(agent))
    }

    pub fn boxed(mut self, agent: Box<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Add a summary agent using the configured summary options.
    pub fn summary(self, name: impl Into<String>) -> Self {
        let config = self.config.summary.clone();
        self.agent(SummaryAgent::new(name, config))
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Register every agent for `correlations` selected correlations and
    /// seal the registry.
    pub fn build(self, correlations: usize) -> Result<Engine> {
        self.config.validate()?;
        let mut registry = BitRegistry::new(correlations)?;
        let mut stats = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let mask = agent
                .correlations()
                .unwrap_or_else(|| CorrelationMask::all(correlations));
            registry.register_as(agent.name(), mask, agent.policy(), agent.role())?;
            stats.push(AgentStats::new(agent.name(), agent.role()));
        }
        registry.seal();

        let strategy = strategy_for(self.config.process);
        log::info!(
            "Engine ready: {} agent(s), {} correlation(s), {} execution{}",
            self.agents.len(),
            correlations,
            strategy.name(),
            if self.config.trial { ", trial run" } else { "" }
        );
        Ok(Engine {
            config: self.config,
            registry,
            agents: self.agents,
            stats,
            strategy,
            cancel: self.cancel,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A configured set of agents ready to run over a data source.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: BitRegistry,
    agents: Vec<Box<dyn Agent>>,
    stats: Vec<AgentStats>,
    strategy: Box<dyn ExecutionStrategy>,
    cancel: CancelToken,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &BitRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &[AgentStats] {
        &self.stats
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every agent over every chunk of `source`.
    ///
    /// Each buffer is flushed to `sink` in one piece after all agents are done
    /// with it, unless the engine runs in trial mode. On error or
    /// cancellation the buffers flushed so far remain valid.
    pub fn run(&mut self, source: &mut dyn ChunkSource, sink: &mut dyn FlagSink) -> Result<RunSummary> {
        if source.correlation_count() != self.registry.correlation_count() {
            return Err(FlagError::Config(format!(
                "source selects {} correlations, agents were registered for {}",
                source.correlation_count(),
                self.registry.correlation_count()
            )));
        }
        if self.config.trial {
            log::info!("Trial run: flags are evaluated but not written");
        }

        let budget = self.config.memory_budget();
        let mut summary = RunSummary::default();
        while let Some(chunk) = source.next_chunk()? {
            if self.cancel.is_cancelled() {
                return Err(Self::cancelled(&summary));
            }
            self.run_chunk(&chunk, &budget, sink, &mut summary)?;
        }

        for stats in &self.stats {
            stats.table_summary();
        }
        summary.report = FlagReport::gather(self.agents.iter().map(|a| a.report()));
        log::info!(
            "Run complete: {} chunk(s), {} buffer(s), {} flushed",
            summary.chunks,
            summary.buffers,
            summary.flushed
        );
        Ok(summary)
    }

    fn run_chunk(
        &mut self,
        chunk: &Chunk,
        budget: &MemoryBudget,
        sink: &mut dyn FlagSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let meta = &chunk.meta;
        log::debug!(
            "Chunk {}: spw {}, field {}, scan {}, {} buffer(s)",
            meta.index,
            meta.spw_id,
            meta.field_name,
            meta.scan,
            chunk.buffers.len()
        );

        let active: Vec<bool> = self.agents.iter_mut().map(|a| a.new_chunk(meta)).collect();
        for stats in self.stats.iter_mut() {
            stats.begin_chunk();
        }

        let mut dispatcher = Dispatcher::new(
            &self.registry,
            &self.agents,
            active,
            self.strategy.as_ref(),
            meta,
            budget,
            &mut self.stats,
        )?;
        for buffer in &chunk.buffers {
            if self.cancel.is_cancelled() {
                return Err(Self::cancelled(summary));
            }
            let outcome = dispatcher.dispatch(buffer)?;
            summary.buffers += 1;
            summary.agent_failures += outcome.failed.len() as u64;

            if self.cancel.is_cancelled() {
                return Err(Self::cancelled(summary));
            }
            let flags = dispatcher.resolve(buffer)?;
            if !self.config.trial {
                sink.flush(meta, flags)?;
                summary.flushed += 1;
            }
        }
        let tally = dispatcher.finish();
        tally.log(meta);
        summary.restarts += tally.restarts;
        summary.chunks += 1;

        for agent in self.agents.iter_mut() {
            agent.end_chunk(meta);
        }
        for stats in self.stats.iter_mut() {
            stats.end_chunk(meta);
        }
        Ok(())
    }

    fn cancelled(summary: &RunSummary) -> FlagError {
        log::warn!(
            "Run cancelled after {} buffer(s); {} flushed buffer(s) remain valid",
            summary.buffers,
            summary.flushed
        );
        FlagError::Cancelled
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
