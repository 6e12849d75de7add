//! Provider registry: every configured adapter, keyed by provider kind.
//!
//! The registry is built once at startup. The dispatcher asks it for an
//! adapter when the user switches providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use astrochat_config::{AppConfig, ConfigError};
use astrochat_core::provider::{ProviderAdapter, ProviderKind, ProviderSettings};
use tracing::info;

use crate::anthropic::AnthropicAdapter;
use crate::huggingface::HuggingFaceAdapter;
use crate::openai_compat::OpenAiCompatAdapter;

/// Holds one adapter per configured provider.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    default_provider: ProviderKind,
}

impl ProviderRegistry {
    /// Create an empty registry with a default provider.
    pub fn new(default_provider: ProviderKind) -> Self {
        Self {
            adapters: HashMap::new(),
            default_provider,
        }
    }

    /// Register an adapter under the kind its settings declare.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.settings().provider, adapter);
    }

    /// The adapter for the default provider.
    pub fn default_adapter(&self) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&self.default_provider).cloned()
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    /// Look up an adapter by id or alias ("openai", "claude", "hf", ...).
    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        ProviderKind::parse(id).and_then(|kind| self.get_kind(kind))
    }

    pub fn get_kind(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Registered providers, in a stable order.
    pub fn list(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

/// Build the adapter matching `settings.provider`.
pub fn adapter_for(settings: ProviderSettings, timeout: Duration) -> Arc<dyn ProviderAdapter> {
    match settings.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiCompatAdapter::new(settings).with_timeout(timeout)),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(settings).with_timeout(timeout)),
        ProviderKind::HuggingFace => {
            Arc::new(HuggingFaceAdapter::new(settings).with_timeout(timeout))
        }
    }
}

/// Build adapters for every provider that has credentials.
///
/// Fails when the active provider itself cannot be built.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRegistry, ConfigError> {
    let active = config.active_kind()?;
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let mut registry = ProviderRegistry::new(active);

    for settings in config.configured_providers() {
        info!(provider = %settings.provider, model = %settings.model, "Registering provider");
        registry.register(adapter_for(settings, timeout));
    }

    if registry.default_adapter().is_none() {
        // Surfaces the precise reason (unknown id, missing key)
        config.resolve_provider(active.as_str())?;
        return Err(ConfigError::MissingApiKey(active));
    }

    Ok(registry)
}
