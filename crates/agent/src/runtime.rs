//! Composition root: wires config, store, providers and dispatcher together.

use std::sync::Arc;

use astrochat_config::{AppConfig, LoggingConfig};
use astrochat_core::chart::{ChartFacts, PartnerFacts, ReadingType, TimeContext};
use astrochat_core::error::{Error, Result};
use astrochat_core::event::ConversationMirror;
use astrochat_core::provider::CanonicalResponse;
use astrochat_core::store::ConversationStore;
use astrochat_memory::{InMemoryTurnStore, SqliteTurnStore};
use astrochat_providers::build_from_config;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::{AssemblyInput, ContextAssembler, SamplingDefaults};
use crate::dispatcher::{Dispatcher, RetryPolicy};
use crate::mirror::spawn_mirror_forwarder;

/// A ready-to-use conversation runtime.
pub struct Runtime {
    dispatcher: Arc<Dispatcher>,
    assembler: ContextAssembler,
    sampling: SamplingDefaults,
}

impl Runtime {
    pub fn new(dispatcher: Arc<Dispatcher>, assembler: ContextAssembler, sampling: SamplingDefaults) -> Self {
        Self {
            dispatcher,
            assembler,
            sampling,
        }
    }

    /// Open the configured store, register every configured provider and
    /// activate the one named by `active_provider`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn ConversationStore> = match config.store.backend.as_str() {
            "memory" => Arc::new(InMemoryTurnStore::new()),
            "sqlite" => Arc::new(SqliteTurnStore::open(&config.store.resolved_path()).await?),
            other => {
                return Err(Error::Config {
                    message: format!("Unknown store backend '{other}'"),
                });
            }
        };

        let registry = build_from_config(config)?;
        let active = registry.default_adapter().ok_or_else(|| Error::Config {
            message: format!("Provider '{}' is not configured", config.active_provider),
        })?;

        info!(
            provider = %active.settings().provider,
            model = %active.settings().model,
            store = store.name(),
            "Runtime ready"
        );

        let dispatcher = Dispatcher::new(active, store)
            .with_registry(Arc::new(registry))
            .with_retry(RetryPolicy::from_config(&config.retry));

        Ok(Self::new(
            Arc::new(dispatcher),
            ContextAssembler::from_config(&config.context),
            SamplingDefaults::from_config(config),
        ))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    /// Fetch the tail, assemble the reading and dispatch it.
    pub async fn ask(
        &self,
        reading: ReadingType,
        chart: &ChartFacts,
        time: Option<&TimeContext>,
        partner: Option<&PartnerFacts>,
        question: &str,
    ) -> Result<CanonicalResponse> {
        let tail = self
            .dispatcher
            .store()
            .fetch_tail(self.assembler.budget().max_tail_turns)
            .await?;

        let input = AssemblyInput {
            reading,
            chart,
            time,
            partner,
            tail: &tail,
            question,
        };
        let assembled = self.assembler.assemble(&input);
        debug!(
            reading = reading.as_str(),
            chars = assembled.metadata.total_chars,
            tokens = assembled.metadata.estimated_tokens,
            prior_turns = assembled.prior_turns.len(),
            drops = assembled.metadata.drops.len(),
            "Assembled context"
        );

        self.dispatcher
            .generate_response(assembled.into_request(&self.sampling))
            .await
    }

    /// Relay persisted turns to `mirror` in the background.
    pub fn attach_mirror(&self, mirror: Arc<dyn ConversationMirror>) -> JoinHandle<()> {
        info!(mirror = mirror.name(), "Attached conversation mirror");
        spawn_mirror_forwarder(self.dispatcher.events(), mirror)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the config.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let installed = if config.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };

    if installed.is_ok() {
        debug!(level = %config.level, format = %config.format, "Logging initialized");
    }
}
