//! # astrochat core
//!
//! Domain types, traits, and error definitions for the astrochat provider
//! orchestration layer. This crate has **no framework dependencies**: it
//! defines the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their own crates:
//! - [`ProviderAdapter`] in `astrochat-providers`
//! - [`ConversationStore`] in `astrochat-memory`
//! - [`ConversationMirror`] is supplied by the host application

pub mod chart;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use chart::{ChartFacts, PartnerFacts, ReadingType, ScoredFact, TimeContext};
pub use error::{Error, ErrorKind, ProviderError, Result, StoreError, USER_FACING_FAILURE};
pub use event::{ConversationMirror, DomainEvent, EventBus, MirrorError};
pub use message::{ConversationTurn, Role, TurnId};
pub use provider::{
    CanonicalRequest, CanonicalResponse, CanonicalResult, ProviderAdapter, ProviderKind,
    ProviderSettings, RawResponse, WireRequest,
};
pub use store::{ConversationStore, TurnFilter};
