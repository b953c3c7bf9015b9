//! Shared value types: the flag word layout, pre-flag policies, counters.

pub mod counts;
pub mod flag_word;

pub use counts::FlagCounts;
pub use flag_word::{
    bit, AgentRole, CorrelationMask, FlagWord, PreFlagPolicy, ROW_ABSENT, ROW_FLAGGED, ROW_RESERVED_BITS,
    WORD_BITS,
};
