//! Bit registry: hands out one flag-word bit per agent.
//!
//! Every agent that writes flags owns exactly one bit in the cell words and
//! one bit in the row words. Ownership is what lets several agents update the
//! same word concurrently without a lock: each one only ever touches its own
//! bit.
//!
//! Registration happens once at engine setup. After the last agent is
//! registered the registry is [sealed](BitRegistry::seal), which computes the
//! masks that depend on the full set of agents: the cross-agent masks and the
//! per-correlation covering masks read on every flushed sample.
//!
//! # Example
//!
//! ```
//! use redflag::registry::BitRegistry;
//! use redflag::types::{CorrelationMask, PreFlagPolicy};
//!
//! let mut registry = BitRegistry::new(2).unwrap();
//! let clip = registry.register("clip", CorrelationMask::all(2), PreFlagPolicy::Honor).unwrap();
//! let quack = registry.register("quack", CorrelationMask::all(2), PreFlagPolicy::Ignore).unwrap();
//! registry.seal();
//!
//! assert_eq!((clip, quack), (2, 3));
//! assert_eq!(registry.agent(0).unwrap().cross_agent_mask(), 1 << 3);
//! ```

pub mod registration;

pub use registration::AgentRegistration;

use crate::types::{AgentRole, CorrelationMask, FlagWord, PreFlagPolicy, ROW_RESERVED_BITS, WORD_BITS};
use crate::utilities::errors::{FlagError, Result};

/// Assigns disjoint agent bits and derives the per-agent masks.
#[derive(Debug, Clone)]
pub struct BitRegistry {
    /// Number of pre-existing per-correlation bits (`P`).
    pre_flag_bits: u32,
    agents: Vec<AgentRegistration>,
    sealed: bool,
    /// Flagging agent bits per correlation, filled at seal.
    flag_covering: Vec<FlagWord>,
    /// Unflagging agent bits per correlation, filled at seal.
    unflag_covering: Vec<FlagWord>,
    row_flag_mask: FlagWord,
    row_unflag_mask: FlagWord,
}

impl BitRegistry {
    /// Create a registry for chunks with `correlation_count` selected
    /// correlations; those occupy the low `P` bits of every cell word.
    pub fn new(correlation_count: usize) -> Result<Self> {
        if correlation_count >= WORD_BITS as usize {
            return Err(FlagError::InvalidShape(format!(
                "{} correlations leave no room for agent bits in a {}-bit word",
                correlation_count, WORD_BITS
            )));
        }
        Ok(Self {
            pre_flag_bits: correlation_count as u32,
            agents: Vec::new(),
            sealed: false,
            flag_covering: Vec::new(),
            unflag_covering: Vec::new(),
            row_flag_mask: 0,
            row_unflag_mask: 0,
        })
    }

    // --- Registration ---

    /// Register a flagging agent and return its cell bit index.
    ///
    /// The correlation mask is clamped to the `P` selected correlations.
    /// Fails with [`FlagError::CapacityExceeded`] when the cell word or the
    /// row word has no free bit left.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        correlations: CorrelationMask,
        policy: PreFlagPolicy,
    ) -> Result<u32> {
        self.register_as(name, correlations, policy, AgentRole::Flag)
    }

    /// Register an agent with an explicit [`AgentRole`].
    pub fn register_as(
        &mut self,
        name: impl Into<String>,
        correlations: CorrelationMask,
        policy: PreFlagPolicy,
        role: AgentRole,
    ) -> Result<u32> {
        let name = name.into();
        if self.sealed {
            return Err(FlagError::Sealed(name));
        }
        if self.agents.iter().any(|a| a.name == name) {
            return Err(FlagError::Config(format!(
                "agent name '{}' is already registered",
                name
            )));
        }

        let ordinal = self.agents.len();
        let cell_bit = self.pre_flag_bits + ordinal as u32;
        let row_bit = ROW_RESERVED_BITS + ordinal as u32;
        if cell_bit >= WORD_BITS || row_bit >= WORD_BITS {
            return Err(FlagError::CapacityExceeded {
                agent: name,
                used: self.pre_flag_bits.max(ROW_RESERVED_BITS) + ordinal as u32,
                reserved: self.pre_flag_bits.max(ROW_RESERVED_BITS),
                width: WORD_BITS,
            });
        }

        let correlations = correlations.clamp(self.pre_flag_bits as usize);
        log::debug!(
            "Registered {} agent '{}' on bit {} (row bit {}, correlations {:?}, policy {})",
            role,
            name,
            cell_bit,
            row_bit,
            correlations,
            policy
        );
        self.agents.push(AgentRegistration::new(
            name,
            ordinal,
            cell_bit,
            row_bit,
            correlations,
            policy,
            role,
        ));
        Ok(cell_bit)
    }

    /// Freeze the registry and compute the derived masks.
    ///
    /// The cross-agent mask of an agent is the union of the bits of every
    /// other flagging agent whose correlation mask shares at least one
    /// correlation with its own. Partial overlap counts as overlap.
    /// Unflaggers never appear in a cross-agent mask.
    pub fn seal(&mut self) {
        let snapshot: Vec<(CorrelationMask, FlagWord, FlagWord)> = self
            .agents
            .iter()
            .filter(|a| !a.is_unflagger())
            .map(|a| (a.correlations, a.flag_mask(), a.row_mask()))
            .collect();

        for agent in self.agents.iter_mut() {
            agent.check_mask = match agent.policy {
                PreFlagPolicy::Honor => agent.correlations.bits(),
                PreFlagPolicy::Ignore | PreFlagPolicy::Reset => 0,
            };
            let mut cross = 0;
            let mut cross_row = 0;
            let own = agent.flag_mask();
            for (correlations, flag, row) in snapshot.iter() {
                if *flag != own && agent.correlations.intersects(*correlations) {
                    cross |= flag;
                    cross_row |= row;
                }
            }
            agent.cross_agent_mask = cross;
            agent.cross_row_mask = cross_row;
        }

        let correlations = self.correlation_count();
        self.flag_covering = (0..correlations)
            .map(|k| self.scan_covering(k, AgentRole::Flag))
            .collect();
        self.unflag_covering = (0..correlations)
            .map(|k| self.scan_covering(k, AgentRole::Unflag))
            .collect();
        self.row_flag_mask = self.scan_role(AgentRole::Flag, |a| a.row_mask());
        self.row_unflag_mask = self.scan_role(AgentRole::Unflag, |a| a.row_mask());
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    // --- Lookup ---

    /// Registration by ordinal.
    pub fn agent(&self, ordinal: usize) -> Option<&AgentRegistration> {
        self.agents.get(ordinal)
    }

    /// Registration by name.
    pub fn by_name(&self, name: &str) -> Option<&AgentRegistration> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Iterate over all registrations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentRegistration> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Number of pre-existing per-correlation bits (`P`).
    pub fn correlation_count(&self) -> usize {
        self.pre_flag_bits as usize
    }

    // --- Derived masks ---

    /// Mask of the `P` pre-existing flag bits.
    pub fn pre_flag_mask(&self) -> FlagWord {
        CorrelationMask::all(self.pre_flag_bits as usize).bits()
    }

    /// Union of all agent cell bits.
    pub fn agent_mask(&self) -> FlagWord {
        self.agents.iter().fold(0, |m, a| m | a.flag_mask())
    }

    /// Union of all agent row bits.
    pub fn row_agent_mask(&self) -> FlagWord {
        self.agents.iter().fold(0, |m, a| m | a.row_mask())
    }

    /// Row bits of flagging agents.
    pub fn row_flag_mask(&self) -> FlagWord {
        if self.sealed {
            self.row_flag_mask
        } else {
            self.scan_role(AgentRole::Flag, |a| a.row_mask())
        }
    }

    /// Row bits of unflagging agents.
    pub fn row_unflag_mask(&self) -> FlagWord {
        if self.sealed {
            self.row_unflag_mask
        } else {
            self.scan_role(AgentRole::Unflag, |a| a.row_mask())
        }
    }

    /// Cell bits of every flagging agent that evaluates correlation `index`.
    pub fn agents_covering(&self, index: usize) -> FlagWord {
        self.covering(index, AgentRole::Flag)
    }

    /// Cell bits of every unflagging agent that evaluates correlation `index`.
    pub fn unflaggers_covering(&self, index: usize) -> FlagWord {
        self.covering(index, AgentRole::Unflag)
    }

    fn covering(&self, index: usize, role: AgentRole) -> FlagWord {
        if !self.sealed {
            return self.scan_covering(index, role);
        }
        let table = match role {
            AgentRole::Flag => &self.flag_covering,
            AgentRole::Unflag => &self.unflag_covering,
        };
        table.get(index).copied().unwrap_or(0)
    }

    fn scan_covering(&self, index: usize, role: AgentRole) -> FlagWord {
        self.agents
            .iter()
            .filter(|a| a.role == role && a.correlations.contains(index))
            .fold(0, |m, a| m | a.flag_mask())
    }

    fn scan_role(&self, role: AgentRole, mask: impl Fn(&AgentRegistration) -> FlagWord) -> FlagWord {
        self.agents
            .iter()
            .filter(|a| a.role == role)
            .fold(0, |m, a| m | mask(a))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bit;

    fn mask(indices: &[usize]) -> CorrelationMask {
        CorrelationMask::from_indices(indices).unwrap()
    }

    #[test]
    fn test_bits_start_above_pre_flags() {
        let mut reg = BitRegistry::new(4).unwrap();
        assert_eq!(reg.register("a", CorrelationMask::all(4), PreFlagPolicy::Honor).unwrap(), 4);
        assert_eq!(reg.register("b", CorrelationMask::all(4), PreFlagPolicy::Honor).unwrap(), 5);
        assert_eq!(reg.agent(1).unwrap().row_bit, 3);
    }

    #[test]
    fn test_capacity_exceeded_after_bit_63() {
        let mut reg = BitRegistry::new(2).unwrap();
        for i in 0..62 {
            let b = reg
                .register(format!("agent-{}", i), CorrelationMask::all(2), PreFlagPolicy::Ignore)
                .unwrap();
            assert_eq!(b, 2 + i);
        }
        assert_eq!(reg.agent(61).unwrap().bit, 63);

        let err = reg
            .register("one-too-many", CorrelationMask::all(2), PreFlagPolicy::Ignore)
            .unwrap_err();
        assert!(matches!(err, FlagError::CapacityExceeded { .. }));
        assert_eq!(reg.len(), 62);
    }

    #[test]
    fn test_single_correlation_limited_by_row_word() {
        let mut reg = BitRegistry::new(1).unwrap();
        for i in 0..62 {
            reg.register(format!("a{}", i), CorrelationMask::all(1), PreFlagPolicy::Ignore)
                .unwrap();
        }
        assert!(reg
            .register("extra", CorrelationMask::all(1), PreFlagPolicy::Ignore)
            .is_err());
    }

    #[test]
    fn test_check_mask_by_policy() {
        let mut reg = BitRegistry::new(4).unwrap();
        reg.register("honor", mask(&[0, 1]), PreFlagPolicy::Honor).unwrap();
        reg.register("ignore", mask(&[0, 1]), PreFlagPolicy::Ignore).unwrap();
        reg.register("reset", mask(&[2]), PreFlagPolicy::Reset).unwrap();
        reg.seal();

        assert_eq!(reg.by_name("honor").unwrap().check_mask(), 0b11);
        assert_eq!(reg.by_name("ignore").unwrap().check_mask(), 0);
        assert_eq!(reg.by_name("reset").unwrap().check_mask(), 0);
        assert_eq!(reg.by_name("reset").unwrap().policy, PreFlagPolicy::Reset);
    }

    #[test]
    fn test_cross_agent_mask_partial_overlap() {
        let mut reg = BitRegistry::new(4).unwrap();
        let a = reg.register("a", mask(&[0, 1]), PreFlagPolicy::Honor).unwrap();
        let b = reg.register("b", mask(&[1, 2]), PreFlagPolicy::Honor).unwrap();
        let c = reg.register("c", mask(&[3]), PreFlagPolicy::Honor).unwrap();
        reg.seal();

        let ra = reg.by_name("a").unwrap();
        let rb = reg.by_name("b").unwrap();
        let rc = reg.by_name("c").unwrap();
        assert_eq!(ra.cross_agent_mask(), bit(b));
        assert_eq!(rb.cross_agent_mask(), bit(a));
        assert_eq!(rc.cross_agent_mask(), 0);
        assert_eq!(ra.cross_agent_mask() & bit(c), 0);
        assert_eq!(ra.cross_row_mask(), rb.row_mask());
    }

    #[test]
    fn test_unflaggers_kept_out_of_cross_masks() {
        let mut reg = BitRegistry::new(2).unwrap();
        let a = reg.register("flag", mask(&[0, 1]), PreFlagPolicy::Honor).unwrap();
        let u = reg
            .register_as("unflag", mask(&[0]), PreFlagPolicy::Ignore, AgentRole::Unflag)
            .unwrap();
        reg.seal();

        assert_eq!(reg.by_name("flag").unwrap().cross_agent_mask(), 0);
        assert_eq!(reg.by_name("unflag").unwrap().cross_agent_mask(), bit(a));
        assert_eq!(reg.agents_covering(0), bit(a));
        assert_eq!(reg.unflaggers_covering(0), bit(u));
        assert_eq!(reg.unflaggers_covering(1), 0);
        assert_eq!(reg.row_unflag_mask(), reg.by_name("unflag").unwrap().row_mask());
        assert_eq!(reg.row_flag_mask(), reg.by_name("flag").unwrap().row_mask());
    }

    #[test]
    fn test_agents_covering() {
        let mut reg = BitRegistry::new(2).unwrap();
        let a = reg.register("a", mask(&[0]), PreFlagPolicy::Honor).unwrap();
        let b = reg.register("b", mask(&[0, 1]), PreFlagPolicy::Honor).unwrap();
        reg.seal();
        assert_eq!(reg.agents_covering(0), bit(a) | bit(b));
        assert_eq!(reg.agents_covering(1), bit(b));
        assert_eq!(reg.agent_mask(), bit(a) | bit(b));
        assert_eq!(reg.pre_flag_mask(), 0b11);
    }

    #[test]
    fn test_covering_masks_cached_at_seal() {
        let mut reg = BitRegistry::new(3).unwrap();
        let a = reg.register("a", mask(&[0, 2]), PreFlagPolicy::Honor).unwrap();
        let u = reg
            .register_as("u", mask(&[2]), PreFlagPolicy::Ignore, AgentRole::Unflag)
            .unwrap();
        let before: Vec<_> = (0..4).map(|k| (reg.agents_covering(k), reg.unflaggers_covering(k))).collect();
        let rows = (reg.row_flag_mask(), reg.row_unflag_mask());
        reg.seal();

        assert_eq!(reg.flag_covering, vec![bit(a), 0, bit(a)]);
        assert_eq!(reg.unflag_covering, vec![0, 0, bit(u)]);
        let after: Vec<_> = (0..4).map(|k| (reg.agents_covering(k), reg.unflaggers_covering(k))).collect();
        assert_eq!(before, after);
        assert_eq!(after[3], (0, 0));
        assert_eq!((reg.row_flag_mask, reg.row_unflag_mask), rows);
        assert_eq!(rows, (reg.by_name("a").unwrap().row_mask(), reg.by_name("u").unwrap().row_mask()));
    }

    #[test]
    fn test_correlations_clamped_to_selection() {
        let mut reg = BitRegistry::new(2).unwrap();
        reg.register("wide", CorrelationMask::all(8), PreFlagPolicy::Honor).unwrap();
        assert_eq!(reg.agent(0).unwrap().correlations.bits(), 0b11);
    }

    #[test]
    fn test_sealed_registry_rejects_registration() {
        let mut reg = BitRegistry::new(2).unwrap();
        reg.seal();
        assert!(matches!(
            reg.register("late", CorrelationMask::all(2), PreFlagPolicy::Honor),
            Err(FlagError::Sealed(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = BitRegistry::new(2).unwrap();
        reg.register("clip", CorrelationMask::all(2), PreFlagPolicy::Honor).unwrap();
        assert!(reg.register("clip", CorrelationMask::all(2), PreFlagPolicy::Honor).is_err());
    }

    #[test]
    fn test_too_many_correlations() {
        assert!(BitRegistry::new(64).is_err());
    }
}
