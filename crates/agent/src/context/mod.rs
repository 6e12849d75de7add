//! Reading context assembly.
//!
//! | Section | Source | Trim Strategy |
//! |---------|--------|---------------|
//! | Chart Facts | Natal chart | Summary truncated, lists ranked by score |
//! | Time Context | Transits, progressions | Ranked by score |
//! | Partner Chart | Synastry partner | Profile truncated |
//! | Synastry Aspects | Cross-chart aspects | Ranked by score |
//! | Question | User | Truncated |
//! | Prior turns | Conversation store | Oldest dropped first |

pub mod assembler;
pub mod templates;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyInput, AssemblyMetadata, ContextAssembler, ContextBudget, DropInfo,
    SamplingDefaults, SectionBudget, SectionStats,
};
