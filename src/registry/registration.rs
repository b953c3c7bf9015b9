//! Agent registration record.

use serde::Serialize;

use crate::types::{bit, AgentRole, CorrelationMask, FlagWord, PreFlagPolicy};

/// One agent's entry in the [`BitRegistry`](super::BitRegistry).
///
/// The assigned bits never change once handed out. The derived masks are
/// filled in when the registry is sealed, because the cross-agent mask
/// depends on every other registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRegistration {
    /// Agent name, unique within the registry.
    pub name: String,
    /// Position in registration order.
    pub ordinal: usize,
    /// Bit index owned in cell words (`>= P`).
    pub bit: u32,
    /// Bit index owned in row words (`>= ROW_RESERVED_BITS`).
    pub row_bit: u32,
    /// Correlations this agent evaluates.
    pub correlations: CorrelationMask,
    /// Pre-flag policy.
    pub policy: PreFlagPolicy,
    /// Whether a raised bit flags or unflags.
    pub role: AgentRole,
    pub(super) check_mask: FlagWord,
    pub(super) cross_agent_mask: FlagWord,
    pub(super) cross_row_mask: FlagWord,
}

impl AgentRegistration {
    pub(super) fn new(
        name: String,
        ordinal: usize,
        bit: u32,
        row_bit: u32,
        correlations: CorrelationMask,
        policy: PreFlagPolicy,
        role: AgentRole,
    ) -> Self {
        Self {
            name,
            ordinal,
            bit,
            row_bit,
            correlations,
            policy,
            role,
            check_mask: 0,
            cross_agent_mask: 0,
            cross_row_mask: 0,
        }
    }

    /// Single-bit mask of the agent's cell bit.
    #[inline]
    pub fn flag_mask(&self) -> FlagWord {
        bit(self.bit)
    }

    /// Single-bit mask of the agent's row bit.
    #[inline]
    pub fn row_mask(&self) -> FlagWord {
        bit(self.row_bit)
    }

    /// Pre-existing flag bits this agent treats as already bad.
    ///
    /// `0` under `Ignore` and `Reset`, the correlation mask under `Honor`.
    #[inline]
    pub fn check_mask(&self) -> FlagWord {
        self.check_mask
    }

    /// Cell bits of every other agent sharing at least one correlation.
    #[inline]
    pub fn cross_agent_mask(&self) -> FlagWord {
        self.cross_agent_mask
    }

    /// Row bits of every other agent sharing at least one correlation.
    #[inline]
    pub fn cross_row_mask(&self) -> FlagWord {
        self.cross_row_mask
    }

    pub fn is_unflagger(&self) -> bool {
        self.role == AgentRole::Unflag
    }

    /// Whether the agent honours row flags that exist in the source.
    #[inline]
    pub fn honors_pre_flags(&self) -> bool {
        self.policy == PreFlagPolicy::Honor
    }
}
