//! Configuration loading, validation, and management for astrochat.
//!
//! Loads configuration from `~/.astrochat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use astrochat_core::provider::{ProviderKind, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.astrochat/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider used for new requests
    #[serde(default = "default_provider")]
    pub active_provider: String,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default nucleus sampling cutoff
    #[serde(default = "default_top_p")]
    pub default_top_p: f32,

    /// Deadline for one provider HTTP call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Backoff for transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Context assembly budgets
    #[serde(default)]
    pub context: ContextConfig,

    /// Conversation store
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    1.0
}
fn default_request_timeout() -> u64 {
    60
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Per-provider settings. Everything is optional; gaps are filled from
/// well-known defaults by [`AppConfig::resolve_provider`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_max_tokens", &self.default_max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first. `1` disables retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Item and character budgets for each assembled section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// How many prior turns to send with each request
    #[serde(default = "default_max_tail_turns")]
    pub max_tail_turns: usize,

    /// Total characters of prior turns sent with each request
    #[serde(default = "default_tail_max_chars")]
    pub tail_max_chars: usize,

    #[serde(default = "default_aspects")]
    pub aspects: usize,

    #[serde(default = "default_placements")]
    pub placements: usize,

    #[serde(default = "default_house_rulers")]
    pub house_rulers: usize,

    #[serde(default = "default_transits")]
    pub transits: usize,

    #[serde(default = "default_progressions")]
    pub progressions: usize,

    #[serde(default = "default_synastry_aspects")]
    pub synastry_aspects: usize,

    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,

    #[serde(default = "default_partner_chars")]
    pub partner_chars: usize,

    #[serde(default = "default_question_chars")]
    pub question_chars: usize,
}

fn default_max_tail_turns() -> usize {
    6
}
fn default_tail_max_chars() -> usize {
    2_000
}
fn default_aspects() -> usize {
    10
}
fn default_placements() -> usize {
    12
}
fn default_house_rulers() -> usize {
    6
}
fn default_transits() -> usize {
    8
}
fn default_progressions() -> usize {
    4
}
fn default_synastry_aspects() -> usize {
    10
}
fn default_summary_chars() -> usize {
    1_200
}
fn default_partner_chars() -> usize {
    1_000
}
fn default_question_chars() -> usize {
    2_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tail_turns: default_max_tail_turns(),
            tail_max_chars: default_tail_max_chars(),
            aspects: default_aspects(),
            placements: default_placements(),
            house_rulers: default_house_rulers(),
            transits: default_transits(),
            progressions: default_progressions(),
            synastry_aspects: default_synastry_aspects(),
            summary_chars: default_summary_chars(),
            partner_chars: default_partner_chars(),
            question_chars: default_question_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Database file; defaults to `~/.astrochat/conversation.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The database path, falling back to the config directory.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("conversation.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

const STORE_BACKENDS: &[&str] = &["sqlite", "memory"];
const LOG_FORMATS: &[&str] = &["text", "json"];

/// Well-known endpoint for a provider.
pub fn default_endpoint(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::HuggingFace => "https://api-inference.huggingface.co/models",
    }
}

/// Well-known default model for a provider.
pub fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-3-5-haiku-latest",
        ProviderKind::HuggingFace => "mistralai/Mistral-7B-Instruct-v0.3",
    }
}

const DEFAULT_PROVIDER_MAX_TOKENS: u32 = 1024;

impl AppConfig {
    /// Load configuration from the default path (~/.astrochat/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `ASTROCHAT_PROVIDER`, `ASTROCHAT_MODEL`
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`
    /// - `HUGGINGFACE_API_KEY` (then `HF_TOKEN`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// API keys from the environment replace only keys missing from the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(provider) = non_empty("ASTROCHAT_PROVIDER") {
            self.active_provider = provider;
        }

        let keys = [
            (ProviderKind::OpenAi, non_empty("OPENAI_API_KEY")),
            (ProviderKind::Anthropic, non_empty("ANTHROPIC_API_KEY")),
            (
                ProviderKind::HuggingFace,
                non_empty("HUGGINGFACE_API_KEY").or_else(|| non_empty("HF_TOKEN")),
            ),
        ];
        for (kind, key) in keys {
            let Some(key) = key else { continue };
            let entry = self.provider_entry_mut(kind);
            if entry.api_key.is_none() {
                entry.api_key = Some(key);
            }
        }

        if let Some(model) = non_empty("ASTROCHAT_MODEL") {
            if let Some(kind) = ProviderKind::parse(&self.active_provider) {
                self.provider_entry_mut(kind).default_model = Some(model);
            }
        }
    }

    /// The `[providers.<id>]` table for `kind`, matching ids through aliases.
    fn provider_entry_mut(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        let existing = self
            .providers
            .keys()
            .find(|id| ProviderKind::parse(id) == Some(kind))
            .cloned();
        let id = existing.unwrap_or_else(|| kind.as_str().to_string());
        self.providers.entry(id).or_default()
    }

    fn provider_entry(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|(id, _)| ProviderKind::parse(id) == Some(kind))
            .map(|(_, cfg)| cfg)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".astrochat")
    }

    /// The active provider, parsed.
    pub fn active_kind(&self) -> Result<ProviderKind, ConfigError> {
        ProviderKind::parse(&self.active_provider)
            .ok_or_else(|| ConfigError::UnknownProvider(self.active_provider.clone()))
    }

    /// Merge `[providers.<id>]` with well-known defaults.
    pub fn resolve_provider(&self, id: &str) -> Result<ProviderSettings, ConfigError> {
        let kind =
            ProviderKind::parse(id).ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))?;
        let entry = self.provider_entry(kind).cloned().unwrap_or_default();

        let api_key = entry
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey(kind))?;

        Ok(ProviderSettings {
            provider: kind,
            api_key,
            model: entry
                .default_model
                .unwrap_or_else(|| default_model(kind).to_string()),
            endpoint: entry
                .api_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| default_endpoint(kind).to_string()),
            default_max_tokens: entry
                .default_max_tokens
                .unwrap_or(DEFAULT_PROVIDER_MAX_TOKENS),
        })
    }

    /// Every provider that has a key, resolved. Order is stable.
    pub fn configured_providers(&self) -> Vec<ProviderSettings> {
        [
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::HuggingFace,
        ]
        .into_iter()
        .filter_map(|kind| self.resolve_provider(kind.as_str()).ok())
        .collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(self.default_top_p > 0.0 && self.default_top_p <= 1.0) {
            return Err(ConfigError::ValidationError(
                "default_top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        self.active_kind()?;

        for (id, provider) in &self.providers {
            if ProviderKind::parse(id).is_none() {
                return Err(ConfigError::UnknownProvider(id.clone()));
            }
            if provider.default_max_tokens == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{id}.default_max_tokens must be > 0"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if !STORE_BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown store backend '{}' (expected one of: {})",
                self.store.backend,
                STORE_BACKENDS.join(", ")
            )));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log format '{}' (expected one of: {})",
                self.logging.format,
                LOG_FORMATS.join(", ")
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_provider: default_provider(),
            default_temperature: default_temperature(),
            default_top_p: default_top_p(),
            request_timeout_secs: default_request_timeout(),
            providers: HashMap::new(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("No API key configured for provider {0}")]
    MissingApiKey(ProviderKind),
}

impl From<ConfigError> for astrochat_core::Error {
    fn from(err: ConfigError) -> Self {
        astrochat_core::Error::Config {
            message: err.to_string(),
        }
    }
}
