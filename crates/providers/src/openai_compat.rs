//! OpenAI-style chat completions adapter.
//!
//! Works with OpenAI and any endpoint exposing a compatible
//! `/chat/completions` route (OpenRouter, vLLM, Ollama, ...).

use async_trait::async_trait;
use astrochat_core::error::ProviderError;
use astrochat_core::message::Role;
use astrochat_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http;

/// An OpenAI-compatible chat completions adapter.
pub struct OpenAiCompatAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
    timeout: Duration,
}

impl OpenAiCompatAdapter {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            timeout: http::DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a connection pool with other adapters.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// System entry first, then the tail, then the new prompt.
    fn to_api_messages(request: &CanonicalRequest) -> Vec<ApiMessage<'_>> {
        let mut messages = Vec::with_capacity(request.tail.len() + 2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ApiMessage {
                role: "system",
                content: system,
            });
        }
        for turn in &request.tail {
            messages.push(ApiMessage {
                role: match turn.role() {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content(),
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: &request.user_prompt,
        });
        messages
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn translate(&self, request: &CanonicalRequest) -> Result<WireRequest, ProviderError> {
        http::check_settings(&self.settings)?;

        let body = ApiRequest {
            model: &self.settings.model,
            messages: Self::to_api_messages(request),
            max_tokens: http::max_tokens(request, &self.settings)?,
            temperature: request.temperature,
            top_p: request.top_p,
        };

        Ok(WireRequest {
            url: format!(
                "{}/chat/completions",
                self.settings.endpoint.trim_end_matches('/')
            ),
            headers: vec![
                (
                    "Authorization".into(),
                    format!("Bearer {}", self.settings.api_key),
                ),
                ("Content-Type".into(), "application/json".into()),
            ],
            body: http::to_body(&body)?,
        })
    }

    async fn send(
        &self,
        wire: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ProviderError> {
        debug!(provider = "openai", model = %self.settings.model, url = %wire.url, "Sending completion request");
        http::send(&self.client, wire, self.timeout, cancel).await
    }

    fn parse(&self, raw: RawResponse) -> CanonicalResult {
        if !raw.is_success() {
            return Err(http::status_error(self.name(), &raw));
        }

        let api_response: ApiResponse = http::decode(&raw)?;
        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);

        Ok(CanonicalResponse {
            content: http::non_blank(content, raw.status)?,
            provider: ProviderKind::OpenAi,
            model: api_response.model,
        })
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
