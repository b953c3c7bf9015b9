//! Dispatcher: runs every active agent over one buffer.
//!
//! A [`Dispatcher`] lives for one chunk and owns that chunk's [`FlagStore`].
//! For each buffer it:
//!
//! 1. moves the store cursor to the buffer's time slot, loading the slot's
//!    pre-existing flags the first time it is visited;
//! 2. hands every active agent a read-only [`AgentView`] and runs the agents
//!    through the configured [`ExecutionStrategy`];
//! 3. waits for all of them (the barrier), then applies the patches of the
//!    agents that succeeded. A failed agent's patch is dropped;
//! 4. runs [`Agent::observe`] for every agent that succeeded, over the slot
//!    with all patches applied, through the same strategy.
//!
//! [`resolve`](Dispatcher::resolve) then turns the slot back into per-sample
//! flags for the sink.

pub mod stats;
pub mod strategy;

pub use stats::{AgentStats, AgentTally, ChunkTally};
pub use strategy::{strategy_for, AgentJob, ExecutionStrategy, Parallel, Sequential};

use crate::agents::Agent;
use crate::registry::BitRegistry;
use crate::source::{Buffer, BufferFlags, ChunkMeta, RowFlags};
use crate::store::view::{row_flagged, sample_flagged};
use crate::store::{Advance, AgentView, FlagStore, MemoryBudget};
use crate::utilities::errors::{FlagError, Result};

/// What one dispatch pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub time_index: usize,
    pub advance: Advance,
    /// Agents whose patch was applied.
    pub applied: usize,
    /// Agents that failed on this buffer.
    pub failed: Vec<String>,
}

/// Per-chunk dispatcher.
pub struct Dispatcher<'a> {
    registry: &'a BitRegistry,
    agents: &'a [Box<dyn Agent>],
    active: Vec<bool>,
    strategy: &'a dyn ExecutionStrategy,
    meta: &'a ChunkMeta,
    store: FlagStore,
    stats: &'a mut [AgentStats],
    tally: ChunkTally,
}

impl<'a> Dispatcher<'a> {
    /// Build the dispatcher for one chunk and allocate its store.
    ///
    /// `agents[i]` must be the agent registered with ordinal `i`, and
    /// `stats[i]` its statistics. Fails with
    /// [`FlagError::ResourceExceeded`] before anything is allocated when the
    /// chunk's store does not fit `budget`.
    pub fn new(
        registry: &'a BitRegistry,
        agents: &'a [Box<dyn Agent>],
        active: Vec<bool>,
        strategy: &'a dyn ExecutionStrategy,
        meta: &'a ChunkMeta,
        budget: &MemoryBudget,
        stats: &'a mut [AgentStats],
    ) -> Result<Self> {
        if !registry.is_sealed() {
            return Err(FlagError::NotSealed);
        }
        if agents.len() != registry.len() || active.len() != agents.len() || stats.len() != agents.len() {
            return Err(FlagError::Config(format!(
                "{} agents, {} registrations, {} activity flags and {} stats entries do not line up",
                agents.len(),
                registry.len(),
                active.len(),
                stats.len()
            )));
        }
        for (i, agent) in agents.iter().enumerate() {
            match registry.agent(i) {
                Some(reg) if reg.name == agent.name() => {}
                _ => {
                    return Err(FlagError::Config(format!(
                        "agent '{}' is not registered with ordinal {}",
                        agent.name(),
                        i
                    )))
                }
            }
        }
        if meta.correlation_count() > registry.correlation_count() {
            return Err(FlagError::InvalidShape(format!(
                "chunk {} has {} correlations, the registry was set up for {}",
                meta.index,
                meta.correlation_count(),
                registry.correlation_count()
            )));
        }

        let store = FlagStore::init_within(meta.shape(), budget)?;
        log::debug!(
            "Dispatcher for chunk {} ready: {} of {} agents active, {} strategy",
            meta.index,
            active.iter().filter(|a| **a).count(),
            agents.len(),
            strategy.name()
        );
        Ok(Self {
            registry,
            agents,
            active,
            strategy,
            meta,
            store,
            stats,
            tally: ChunkTally::default(),
        })
    }

    pub fn store(&self) -> &FlagStore {
        &self.store
    }

    pub fn meta(&self) -> &ChunkMeta {
        self.meta
    }

    pub fn tally(&self) -> &ChunkTally {
        &self.tally
    }

    /// Run every active agent over `buffer` and apply the successful patches.
    pub fn dispatch(&mut self, buffer: &Buffer) -> Result<DispatchOutcome> {
        let meta = self.meta;
        buffer.validate(meta)?;

        let loader = buffer.loader(meta);
        let advance = self.store.advance(buffer.time_index, Some(&loader))?;
        if let Advance::Restarted { .. } = advance {
            self.tally.restarts += 1;
        }
        self.tally.record_input(buffer, meta);

        let registry = self.registry;
        let store = &self.store;
        let time = buffer.time_index;

        let mut ordinals = Vec::new();
        let mut jobs = Vec::new();
        for (i, agent) in self.agents.iter().enumerate() {
            if !self.active[i] {
                continue;
            }
            let registration = registry
                .agent(i)
                .ok_or_else(|| FlagError::Config(format!("no registration for ordinal {}", i)))?;
            let agent: &dyn Agent = &**agent;
            ordinals.push(i);
            jobs.push(AgentJob {
                agent: registration.name.as_str(),
                time,
                run: Box::new(move || {
                    let mut view = AgentView::new(store, registry, registration);
                    agent.evaluate(&mut view, buffer, meta)?;
                    Ok(view.into_patch())
                }),
            });
        }

        let results = self.strategy.run_all(jobs);

        // Barrier passed: every agent is done with this buffer.
        let mut outcome = DispatchOutcome {
            time_index: time,
            advance,
            applied: 0,
            failed: Vec::new(),
        };
        let mut observers = Vec::new();
        for (i, result) in ordinals.into_iter().zip(results) {
            let registration = registry
                .agent(i)
                .ok_or_else(|| FlagError::Config(format!("no registration for ordinal {}", i)))?;
            let correlations = registration.correlations.count() as u64;
            let samples = (buffer.rows.len() * meta.channels) as u64 * correlations;
            match result {
                Ok(patch) => {
                    let applied = self.store.apply_patch(registration, &patch)?;
                    self.stats[i].record(&applied, correlations, samples);
                    outcome.applied += 1;
                    observers.push(i);
                }
                Err(err) => {
                    let err = evaluation_error(&registration.name, time, err);
                    log::error!("{}; its writes for this buffer were discarded", err);
                    self.stats[i].record_failure(samples);
                    outcome.failed.push(registration.name.clone());
                }
            }
        }

        self.observe(buffer, &observers, &mut outcome)?;
        Ok(outcome)
    }

    /// Run [`Agent::observe`] for `ordinals` over the slot with every patch
    /// applied. A failure is logged and counted; the agent's writes for the
    /// buffer stay applied.
    fn observe(&mut self, buffer: &Buffer, ordinals: &[usize], outcome: &mut DispatchOutcome) -> Result<()> {
        let meta = self.meta;
        let registry = self.registry;
        let agents = self.agents;
        let store = &self.store;
        let time = buffer.time_index;

        let mut jobs = Vec::with_capacity(ordinals.len());
        for &i in ordinals {
            let registration = registry
                .agent(i)
                .ok_or_else(|| FlagError::Config(format!("no registration for ordinal {}", i)))?;
            let agent: &dyn Agent = &*agents[i];
            jobs.push(AgentJob {
                agent: registration.name.as_str(),
                time,
                run: Box::new(move || {
                    let view = AgentView::new(store, registry, registration);
                    agent.observe(&view, buffer, meta)?;
                    Ok(view.into_patch())
                }),
            });
        }
        let results = self.strategy.run_all(jobs);

        for (&i, result) in ordinals.iter().zip(results) {
            if let Err(err) = result {
                let registration = registry
                    .agent(i)
                    .ok_or_else(|| FlagError::Config(format!("no registration for ordinal {}", i)))?;
                let samples =
                    (buffer.rows.len() * meta.channels) as u64 * registration.correlations.count() as u64;
                let err = evaluation_error(&registration.name, time, err);
                log::error!("{} while observing the flushed buffer", err);
                self.stats[i].record_failure(samples);
                outcome.failed.push(registration.name.clone());
            }
        }
        Ok(())
    }

    /// Per-sample flags of `buffer`'s rows from the store slot at the
    /// cursor. Call after [`dispatch`](Self::dispatch) for the same buffer.
    pub fn resolve(&mut self, buffer: &Buffer) -> Result<BufferFlags> {
        let meta = self.meta;
        if buffer.time_index != self.store.cursor() {
            return Err(FlagError::InvalidShape(format!(
                "resolving time slot {} while the cursor is at {}",
                buffer.time_index,
                self.store.cursor()
            )));
        }

        let time = buffer.time_index;
        let words = self.store.slot_words(time)?;
        let row_words = self.store.slot_row_words(time)?;
        let resets = self.store.slot_reset_words(time)?;
        let row_resets = self.store.slot_row_reset_words(time)?;
        let channels = meta.channels;
        let correlations = meta.correlation_count();

        let mut rows = Vec::with_capacity(buffer.rows.len());
        for row in &buffer.rows {
            let baseline = meta.baseline_index(row.antenna1, row.antenna2)?;
            let mut flags = vec![false; meta.samples_per_row()];
            for channel in 0..channels {
                let cell = baseline * channels + channel;
                for k in 0..correlations {
                    flags[meta.sample_index(k, channel)] =
                        sample_flagged(self.registry, words[cell], resets[cell], k);
                }
            }
            rows.push(RowFlags {
                antenna1: row.antenna1,
                antenna2: row.antenna2,
                flags,
                row_flag: row_flagged(self.registry, row_words[baseline], row_resets[baseline]),
            });
        }

        let flags = BufferFlags {
            time_index: time,
            rows,
        };
        self.tally.record_output(&flags);
        Ok(flags)
    }

    /// Drop the store and hand back the chunk's input/output tally.
    pub fn finish(self) -> ChunkTally {
        self.tally
    }
}

fn evaluation_error(agent: &str, time: usize, err: FlagError) -> FlagError {
    match err {
        e @ FlagError::AgentEvaluation { .. } => e,
        other => FlagError::evaluation(agent, time, other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ManualAgent, Selection};
    use crate::source::Row;
    use crate::types::{AgentRole, CorrelationMask, PreFlagPolicy};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Flags every cell of every row and remembers whether it ever saw a
    /// sibling's bit.
    #[derive(Debug)]
    struct Marker {
        name: String,
        fail: bool,
        saw_sibling: Arc<AtomicBool>,
    }

    impl Marker {
        fn new(name: &str, fail: bool) -> Self {
            Self {
                name: name.to_string(),
                fail,
                saw_sibling: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Agent for Marker {
        fn name(&self) -> &str {
            &self.name
        }

        fn evaluate(&self, view: &mut AgentView<'_>, buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
            for row in &buffer.rows {
                let b = meta.baseline_index(row.antenna1, row.antenna2)?;
                for c in 0..meta.channels {
                    if view.word(c, b)? & view.agent().cross_agent_mask() != 0 {
                        self.saw_sibling.store(true, Ordering::Relaxed);
                    }
                    view.set_flag(c, b)?;
                }
                view.set_row_flag(b)?;
            }
            if self.fail {
                return Err(FlagError::evaluation(&self.name, view.time(), "marker failure"));
            }
            Ok(())
        }
    }

    fn meta() -> ChunkMeta {
        ChunkMeta::new(
            0,
            vec!["EA01".into(), "EA02".into()],
            vec!["RR".into(), "LL".into()],
            4,
            3,
        )
    }

    fn buffer(meta: &ChunkMeta, time: usize) -> Buffer {
        let mut row = Row::new(0, 1, 1, meta);
        row.flags[meta.sample_index(0, 0)] = true;
        Buffer::new(time, vec![row, Row::new(1, 1, 1, meta)])
    }

    fn setup(agents: Vec<Box<dyn Agent>>) -> (BitRegistry, Vec<Box<dyn Agent>>, Vec<AgentStats>) {
        let mut registry = BitRegistry::new(2).unwrap();
        let mut stats = Vec::new();
        for agent in &agents {
            registry
                .register_as(
                    agent.name(),
                    agent.correlations().unwrap_or(CorrelationMask::all(2)),
                    agent.policy(),
                    agent.role(),
                )
                .unwrap();
            stats.push(AgentStats::new(agent.name(), agent.role()));
        }
        registry.seal();
        (registry, agents, stats)
    }

    #[test]
    fn test_unsealed_registry_rejected() {
        let registry = BitRegistry::new(2).unwrap();
        let agents: Vec<Box<dyn Agent>> = Vec::new();
        let mut stats: Vec<AgentStats> = Vec::new();
        let m = meta();
        let result = Dispatcher::new(
            &registry,
            &agents,
            vec![],
            &Sequential,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        );
        assert!(matches!(result, Err(FlagError::NotSealed)));
    }

    #[test]
    fn test_memory_ceiling_checked_before_allocation() {
        let (registry, agents, mut stats) = setup(vec![Box::new(Marker::new("a", false))]);
        let m = meta();
        let result = Dispatcher::new(
            &registry,
            &agents,
            vec![true],
            &Sequential,
            &m,
            &MemoryBudget::with_ceiling(16),
            &mut stats,
        );
        assert!(matches!(result, Err(FlagError::ResourceExceeded { .. })));
    }

    #[test]
    fn test_siblings_never_see_same_buffer_writes() {
        for strategy in [&Sequential as &dyn ExecutionStrategy, &Parallel] {
            let marker_a = Marker::new("a", false);
            let marker_b = Marker::new("b", false);
            let seen = [marker_a.saw_sibling.clone(), marker_b.saw_sibling.clone()];
            let (registry, agents, mut stats) = setup(vec![Box::new(marker_a), Box::new(marker_b)]);
            let m = meta();
            let mut dispatcher = Dispatcher::new(
                &registry,
                &agents,
                vec![true, true],
                strategy,
                &m,
                &MemoryBudget::unbounded(),
                &mut stats,
            )
            .unwrap();
            let outcome = dispatcher.dispatch(&buffer(&m, 0)).unwrap();
            assert_eq!(outcome.applied, 2);
            assert!(outcome.failed.is_empty());
            assert_eq!(outcome.advance, Advance::Loaded);

            let b = m.baseline_index(0, 1).unwrap();
            let both = registry.agent(0).unwrap().flag_mask() | registry.agent(1).unwrap().flag_mask();
            assert_eq!(dispatcher.store().word(1, b).unwrap(), both);
            // Second buffer on another slot: still nothing from the sibling.
            dispatcher.dispatch(&buffer(&m, 1)).unwrap();
            drop(dispatcher);

            for flag in &seen {
                assert!(!flag.load(Ordering::Relaxed), "{}", strategy.name());
            }
        }
    }

    #[test]
    fn test_failed_agent_is_rolled_back() {
        let (registry, agents, mut stats) =
            setup(vec![Box::new(Marker::new("ok", false)), Box::new(Marker::new("bad", true))]);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true, true],
            &Parallel,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        let before_bad = registry.agent(1).unwrap().flag_mask();
        let outcome = dispatcher.dispatch(&buffer(&m, 0)).unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failed, vec!["bad".to_string()]);

        for b in 0..m.baseline_count() {
            for c in 0..m.channels {
                assert_eq!(dispatcher.store().word(c, b).unwrap() & before_bad, 0);
            }
        }
        drop(dispatcher);
        assert_eq!(stats[1].chunk.failures, 1);
        assert_eq!(stats[0].chunk.failures, 0);
        assert_eq!(stats[0].chunk.raised, 2 * 4 * 2);
    }

    #[test]
    fn test_inactive_agent_skipped() {
        let (registry, agents, mut stats) =
            setup(vec![Box::new(Marker::new("on", false)), Box::new(Marker::new("off", false))]);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true, false],
            &Sequential,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        let outcome = dispatcher.dispatch(&buffer(&m, 0)).unwrap();
        assert_eq!(outcome.applied, 1);
        let b = m.baseline_index(0, 1).unwrap();
        assert_eq!(dispatcher.store().word(0, b).unwrap() & registry.agent(1).unwrap().flag_mask(), 0);
    }

    #[test]
    fn test_bit_isolation() {
        let (registry, agents, mut stats) = setup(vec![
            Box::new(ManualAgent::new("m", Selection::all().channels(1, 2))),
            Box::new(Marker::new("p", false)),
        ]);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true, true],
            &Parallel,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        let buf = buffer(&m, 2);
        dispatcher.dispatch(&buf).unwrap();
        let agent_bits = registry.agent_mask();
        let rows_agent_bits = registry.row_agent_mask();

        let b = m.baseline_index(0, 1).unwrap();
        // Outside the agent bits only the loaded pre-flag remains.
        assert_eq!(dispatcher.store().word(0, b).unwrap() & !agent_bits, 0b01);
        for c in 1..m.channels {
            assert_eq!(dispatcher.store().word(c, b).unwrap() & !agent_bits, 0);
        }
        assert_eq!(dispatcher.store().row_word(b, 2).unwrap() & !rows_agent_bits, 0);
    }

    #[test]
    fn test_resolve_applies_flush_rule() {
        let (registry, agents, mut stats) = setup(vec![
            Box::new(ManualAgent::new("m", Selection::all().baseline(1, 1).channels(3, 3))),
            Box::new(ManualAgent::new("u", Selection::all().baseline(0, 1)).unflag()),
        ]);
        assert_eq!(registry.agent(1).unwrap().role, AgentRole::Unflag);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true, true],
            &Sequential,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        let buf = buffer(&m, 1);
        dispatcher.dispatch(&buf).unwrap();
        let flags = dispatcher.resolve(&buf).unwrap();

        assert_eq!(flags.time_index, 1);
        // Row 0 (EA01&&EA02) had a source flag that the unflagger lifted.
        assert!(flags.rows[0].flags.iter().all(|f| !f));
        // Row 1 (EA02&&EA02) channel 3 flagged on both correlations.
        let expected: Vec<bool> = (0..m.samples_per_row()).map(|i| i >= 6).collect();
        assert_eq!(flags.rows[1].flags, expected);
        assert!(!flags.rows[1].row_flag);

        let tally = dispatcher.finish();
        assert_eq!(tally.input_samples_flagged, 1);
        assert_eq!(tally.output_samples_flagged, 2);
    }

    #[test]
    fn test_resolve_requires_matching_cursor() {
        let (registry, agents, mut stats) = setup(vec![Box::new(Marker::new("a", false))]);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true],
            &Sequential,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        dispatcher.dispatch(&buffer(&m, 1)).unwrap();
        assert!(dispatcher.resolve(&buffer(&m, 2)).is_err());
    }

    #[test]
    fn test_policy_visible_in_registration() {
        let (registry, _, _) = setup(vec![Box::new(
            ManualAgent::new("m", Selection::all()).with_policy(PreFlagPolicy::Reset),
        )]);
        assert_eq!(registry.agent(0).unwrap().policy, PreFlagPolicy::Reset);
        assert_eq!(registry.agent(0).unwrap().check_mask(), 0);
    }

    /// Records, in `observe`, whether channel 0 of EA01&&EA02 is flagged.
    #[derive(Debug)]
    struct Watcher {
        fail: bool,
        saw_flag: Arc<AtomicBool>,
    }

    impl Agent for Watcher {
        fn name(&self) -> &str {
            "watcher"
        }

        fn evaluate(&self, view: &mut AgentView<'_>, _buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
            let b = meta.baseline_index(0, 1)?;
            if view.sample_flagged(1, 0, b)? {
                self.saw_flag.store(true, Ordering::Relaxed);
            }
            Ok(())
        }

        fn observe(&self, view: &AgentView<'_>, _buffer: &Buffer, meta: &ChunkMeta) -> Result<()> {
            let b = meta.baseline_index(0, 1)?;
            if view.sample_flagged(1, 0, b)? {
                self.saw_flag.store(true, Ordering::Relaxed);
            }
            if self.fail {
                return Err(FlagError::evaluation("watcher", view.time(), "observe failure"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_observe_sees_same_buffer_writes() {
        for strategy in [&Sequential as &dyn ExecutionStrategy, &Parallel] {
            let saw_flag = Arc::new(AtomicBool::new(false));
            let watcher = Watcher {
                fail: false,
                saw_flag: saw_flag.clone(),
            };
            let (registry, agents, mut stats) =
                setup(vec![Box::new(Marker::new("m", false)), Box::new(watcher)]);
            let m = meta();
            let mut dispatcher = Dispatcher::new(
                &registry,
                &agents,
                vec![true, true],
                strategy,
                &m,
                &MemoryBudget::unbounded(),
                &mut stats,
            )
            .unwrap();
            // Correlation 1 of channel 0 is not pre-flagged; only the marker flags it.
            let outcome = dispatcher.dispatch(&buffer(&m, 0)).unwrap();
            assert!(outcome.failed.is_empty());
            assert!(saw_flag.load(Ordering::Relaxed), "{}", strategy.name());
        }
    }

    #[test]
    fn test_observe_skipped_after_failed_evaluate() {
        let saw_flag = Arc::new(AtomicBool::new(false));
        let (registry, agents, mut stats) = setup(vec![
            Box::new(Marker::new("m", false)),
            Box::new(Marker::new("bad", true)),
            Box::new(Watcher {
                fail: true,
                saw_flag: saw_flag.clone(),
            }),
        ]);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true, true, true],
            &Parallel,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        let outcome = dispatcher.dispatch(&buffer(&m, 0)).unwrap();
        // "bad" failed in evaluate, the watcher in observe; each is reported once.
        assert_eq!(outcome.failed, vec!["bad".to_string(), "watcher".to_string()]);
        assert_eq!(outcome.applied, 2);
        assert!(saw_flag.load(Ordering::Relaxed));
        drop(dispatcher);
        assert_eq!(stats[1].chunk.failures, 1);
        assert_eq!(stats[2].chunk.failures, 1);
        assert_eq!(stats[0].chunk.failures, 0);
    }

    #[test]
    fn test_reset_scoped_to_marked_rows() {
        let (registry, agents, mut stats) = setup(vec![Box::new(
            ManualAgent::new("r", Selection::all().baseline(1, 1).channels(3, 3))
                .with_policy(PreFlagPolicy::Reset),
        )]);
        let m = meta();
        let mut dispatcher = Dispatcher::new(
            &registry,
            &agents,
            vec![true],
            &Sequential,
            &m,
            &MemoryBudget::unbounded(),
            &mut stats,
        )
        .unwrap();
        let mut rows = vec![Row::new(0, 1, 1, &m), Row::new(1, 1, 1, &m)];
        for row in rows.iter_mut() {
            row.flags[m.sample_index(0, 0)] = true;
        }
        let buf = Buffer::new(0, rows);
        dispatcher.dispatch(&buf).unwrap();
        let flags = dispatcher.resolve(&buf).unwrap();

        // EA01&&EA02 was not selected, so its source flag survives.
        assert!(flags.rows[0].flags[m.sample_index(0, 0)]);
        assert_eq!(flags.rows[0].flags.iter().filter(|f| **f).count(), 1);
        // EA02&&EA02 was selected: its source flag is gone, channel 3 is flagged.
        let expected: Vec<bool> = (0..m.samples_per_row()).map(|i| i >= 6).collect();
        assert_eq!(flags.rows[1].flags, expected);
    }
}
