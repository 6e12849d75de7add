//! Provider adapters for astrochat.
//!
//! All adapters implement the `astrochat_core::ProviderAdapter` trait.
//! The registry builds them from configuration.

pub mod anthropic;
pub mod http;
pub mod huggingface;
pub mod openai_compat;
pub mod registry;

pub use anthropic::AnthropicAdapter;
pub use http::DEFAULT_TIMEOUT;
pub use huggingface::HuggingFaceAdapter;
pub use openai_compat::OpenAiCompatAdapter;
pub use registry::{ProviderRegistry, adapter_for, build_from_config};
