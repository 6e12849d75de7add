//! Request orchestration for astrochat.
//!
//! 1. **Assemble** the reading context from chart facts and the conversation tail
//! 2. **Dispatch** it to the active provider, retrying transient failures
//! 3. **Persist** the user and assistant turns together on success
//! 4. **Publish** domain events, which an optional mirror forwards elsewhere

pub mod context;
pub mod dispatcher;
pub mod mirror;
pub mod runtime;

pub use context::{
    AssembledContext, AssemblyInput, AssemblyMetadata, ContextAssembler, ContextBudget, DropInfo,
    SamplingDefaults, SectionBudget, SectionStats,
};
pub use dispatcher::{Dispatcher, DispatcherState, RetryPolicy};
pub use mirror::spawn_mirror_forwarder;
pub use runtime::{Runtime, init_tracing};
