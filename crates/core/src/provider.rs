//! Provider adapter trait: the abstraction over chat-completion backends.
//!
//! An adapter knows three things about one vendor: how to translate a
//! [`CanonicalRequest`] into that vendor's wire format, how to send it, and
//! how to parse the raw HTTP response back into a [`CanonicalResponse`] or a
//! classified [`ProviderError`].
//!
//! Implementations: OpenAI-style, Anthropic-style, HuggingFace-style.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::ConversationTurn;

/// Which wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    HuggingFace,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::HuggingFace => "huggingface",
        }
    }

    /// Parse a provider identifier, accepting a few common aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "chatgpt" | "gpt" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "huggingface" | "hf" | "hugging_face" => Some(Self::HuggingFace),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved, immutable settings for one provider instance.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub default_max_tokens: u32,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = if self.api_key.is_empty() {
            "None"
        } else {
            "[REDACTED]"
        };
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("api_key", &key)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("default_max_tokens", &self.default_max_tokens)
            .finish()
    }
}

/// The provider-agnostic request every adapter consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// System-level instructions. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Prior turns, oldest first.
    #[serde(default)]
    pub tail: Vec<ConversationTurn>,

    /// The new user prompt.
    pub user_prompt: String,

    /// Maximum tokens to generate. `0` means "use the provider default".
    #[serde(default)]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

impl CanonicalRequest {
    /// A request with no system prompt, no tail and default sampling.
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            tail: Vec::new(),
            user_prompt: user_prompt.into(),
            max_tokens: 0,
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_tail(mut self, tail: Vec<ConversationTurn>) -> Self {
        self.tail = tail;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    /// The token limit to send, falling back to the provider default.
    pub fn effective_max_tokens(&self, settings: &ProviderSettings) -> u32 {
        if self.max_tokens > 0 {
            self.max_tokens
        } else {
            settings.default_max_tokens
        }
    }
}

/// A successful provider answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    /// The generated text. Never empty.
    pub content: String,

    /// Which provider produced it.
    pub provider: ProviderKind,

    /// The model that responded, if the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The outcome of one provider call.
pub type CanonicalResult = std::result::Result<CanonicalResponse, ProviderError>;

/// A fully translated HTTP request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl WireRequest {
    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The raw HTTP response handed to `parse`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after_secs: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The core provider adapter trait.
///
/// `translate` and `parse` are pure and synchronous; only `send` suspends.
/// Adapters never persist anything and never retry on their own.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// A human-readable name for this adapter (e.g., "openai").
    fn name(&self) -> &str;

    /// The immutable settings this adapter was built with.
    fn settings(&self) -> &ProviderSettings;

    /// Translate a canonical request into this provider's wire format.
    fn translate(&self, request: &CanonicalRequest) -> std::result::Result<WireRequest, ProviderError>;

    /// Perform exactly one HTTP call, bounded by the adapter timeout and `cancel`.
    async fn send(
        &self,
        wire: WireRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<RawResponse, ProviderError>;

    /// Parse a raw response into a canonical result.
    fn parse(&self, raw: RawResponse) -> CanonicalResult;

    /// The full translate → send → parse pipeline.
    async fn complete(&self, request: &CanonicalRequest, cancel: &CancellationToken) -> CanonicalResult {
        let wire = self.translate(request)?;
        let raw = self.send(wire, cancel).await?;
        self.parse(raw)
    }
}
