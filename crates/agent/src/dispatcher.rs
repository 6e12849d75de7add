//! The dispatcher: one provider call per request, retried on transient
//! failures, with the resulting exchange persisted atomically.
//!
//! The active adapter is read once when a request starts, so switching
//! providers never affects a call that is already in flight. Nothing is
//! written to the store unless the provider answered.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use astrochat_config::RetryConfig;
use astrochat_core::error::{Error, ErrorKind, ProviderError, Result, StoreError};
use astrochat_core::event::{DomainEvent, EventBus};
use astrochat_core::message::{ConversationTurn, Role};
use astrochat_core::provider::{CanonicalRequest, CanonicalResponse, ProviderAdapter, ProviderKind};
use astrochat_core::store::ConversationStore;
use astrochat_providers::ProviderRegistry;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the dispatcher is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    /// At least one provider call is in flight.
    Sending,
    /// At least one request is waiting before a retry.
    BackingOff,
}

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retry.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before attempt `attempt + 1`.
    ///
    /// `base * 2^(attempt-1)`, raised to the provider's `Retry-After` when
    /// it asks for longer, and capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let hinted = err
            .retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO);
        backoff.max(hinted).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Counts itself in for as long as it lives.
struct StateGuard<'a>(&'a AtomicUsize);

impl<'a> StateGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Routes canonical requests to the active provider adapter.
pub struct Dispatcher {
    active: RwLock<Arc<dyn ProviderAdapter>>,
    registry: Option<Arc<ProviderRegistry>>,
    store: Arc<dyn ConversationStore>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
    sending: AtomicUsize,
    backing_off: AtomicUsize,
}

impl Dispatcher {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            active: RwLock::new(adapter),
            registry: None,
            store,
            events: Arc::new(EventBus::default()),
            retry: RetryPolicy::default(),
            sending: AtomicUsize::new(0),
            backing_off: AtomicUsize::new(0),
        }
    }

    /// Enable [`switch_to`](Self::switch_to) by provider id.
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn state(&self) -> DispatcherState {
        if self.backing_off.load(Ordering::SeqCst) > 0 {
            DispatcherState::BackingOff
        } else if self.sending.load(Ordering::SeqCst) > 0 {
            DispatcherState::Sending
        } else {
            DispatcherState::Idle
        }
    }

    /// The adapter new requests will use.
    pub async fn active(&self) -> Arc<dyn ProviderAdapter> {
        Arc::clone(&*self.active.read().await)
    }

    pub async fn active_provider(&self) -> ProviderKind {
        self.active.read().await.settings().provider
    }

    /// Replace the active adapter. Calls already in flight keep theirs.
    pub async fn switch_provider(&self, adapter: Arc<dyn ProviderAdapter>) {
        let to = adapter.settings().provider;
        let from = {
            let mut active = self.active.write().await;
            let from = active.settings().provider;
            *active = adapter;
            from
        };
        info!(from = %from, to = %to, "Switched active provider");
        self.events.publish(DomainEvent::ProviderSwitched {
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    /// Switch to a registered provider by id or alias.
    pub async fn switch_to(&self, id: &str) -> Result<ProviderKind> {
        let adapter = self
            .registry
            .as_ref()
            .and_then(|registry| registry.get(id))
            .ok_or_else(|| Error::Config {
                message: format!("Provider '{id}' is not configured"),
            })?;
        let kind = adapter.settings().provider;
        self.switch_provider(adapter).await;
        Ok(kind)
    }

    /// Delete the whole conversation log.
    pub async fn clear_history(&self) -> Result<()> {
        self.store.clear().await?;
        self.events.publish(DomainEvent::ConversationCleared {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Send `request` to the active provider and persist the exchange.
    pub async fn generate_response(&self, request: CanonicalRequest) -> Result<CanonicalResponse> {
        self.generate_response_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`generate_response`](Self::generate_response), abandoning the
    /// call (and any pending backoff) when `cancel` fires.
    ///
    /// On success the user turn, stamped at submission, and the assistant
    /// turn are appended in one transaction. On failure the provider's
    /// error is returned unchanged and nothing is written.
    pub async fn generate_response_with_cancel(
        &self,
        request: CanonicalRequest,
        cancel: &CancellationToken,
    ) -> Result<CanonicalResponse> {
        let submitted_at = Utc::now();
        let user_turn = ConversationTurn::at(Role::User, request.user_prompt.as_str(), submitted_at)
            .inspect_err(|_| warn!("Rejected request with an empty user prompt"))?;

        let adapter = self.active().await;
        let provider = adapter.settings().provider;

        let response = {
            let _sending = StateGuard::enter(&self.sending);
            self.call_with_retry(adapter.as_ref(), &request, cancel)
                .await
                .map_err(|(err, attempts)| {
                    warn!(
                        provider = %provider,
                        kind = err.kind.label(),
                        status = ?err.http_status,
                        attempts,
                        "Provider call failed: {err}"
                    );
                    self.events.publish(DomainEvent::ResponseFailed {
                        provider,
                        kind: err.kind.label().to_string(),
                        http_status: err.http_status,
                        attempts,
                        timestamp: Utc::now(),
                    });
                    err
                })?
        };

        let assistant_turn = ConversationTurn::new(Role::Assistant, response.content.as_str())?;
        self.store
            .append_all(vec![user_turn.clone(), assistant_turn.clone()])
            .await
            .map_err(|e: StoreError| {
                error!(provider = %provider, "Failed to persist exchange: {e}");
                e
            })?;

        debug!(
            provider = %provider,
            model = response.model.as_deref().unwrap_or("unknown"),
            chars = response.content.len(),
            "Persisted exchange"
        );
        self.events.publish(DomainEvent::TurnPersisted { turn: user_turn });
        self.events.publish(DomainEvent::TurnPersisted {
            turn: assistant_turn,
        });

        Ok(response)
    }

    /// Attempt the call until it succeeds, fails permanently, runs out of
    /// attempts or is cancelled. Errors carry the number of attempts made.
    async fn call_with_retry(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &CanonicalRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<CanonicalResponse, (ProviderError, u32)> {
        let provider = adapter.settings().provider;
        let mut attempt = 1u32;

        loop {
            let err = match adapter.complete(request, cancel).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts || cancel.is_cancelled() {
                return Err((err, attempt));
            }

            let delay = self.retry.delay_for(attempt, &err);
            warn!(
                provider = %provider,
                attempt,
                kind = err.kind.label(),
                delay_ms = delay.as_millis() as u64,
                "Transient provider failure, retrying"
            );

            {
                let _backing_off = StateGuard::enter(&self.backing_off);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err((ProviderError::new(ErrorKind::Cancelled), attempt));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;
        }
    }
}
