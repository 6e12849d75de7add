//! Anthropic native Messages API adapter.
//!
//! Differences from the OpenAI dialect:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Content as typed blocks, and strictly alternating roles starting with `user`

use async_trait::async_trait;
use astrochat_core::error::ProviderError;
use astrochat_core::message::Role;
use astrochat_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic native Messages API adapter.
pub struct AnthropicAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
    timeout: Duration,
}

impl AnthropicAdapter {
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

    fn messages_url(&self) -> String {
        let base = self.settings.endpoint.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    /// Convert the tail and prompt to content-block messages.
    ///
    /// Leading assistant turns are dropped and consecutive same-role turns
    /// are merged into one message, since the API rejects anything else.
    fn to_api_messages(request: &CanonicalRequest) -> Vec<AnthropicMessage<'_>> {
        let turns = request
            .tail
            .iter()
            .map(|t| {
                let role = match t.role() {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                (role, t.content())
            })
            .skip_while(|(role, _)| *role == "assistant")
            .chain(std::iter::once(("user", request.user_prompt.as_str())));

        let mut result: Vec<AnthropicMessage<'_>> = Vec::new();
        for (role, text) in turns {
            let block = ContentBlock { kind: "text", text };
            match result.last_mut() {
                Some(last) if last.role == role => last.content.push(block),
                _ => result.push(AnthropicMessage {
                    role,
                    content: vec![block],
                }),
            }
        }
        result
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn translate(&self, request: &CanonicalRequest) -> Result<WireRequest, ProviderError> {
        http::check_settings(&self.settings)?;

        let body = AnthropicRequest {
            model: &self.settings.model,
            max_tokens: http::max_tokens(request, &self.settings)?,
            temperature: request.temperature,
            system: request
                .system_prompt
                .as_deref()
                .filter(|s| !s.trim().is_empty()),
            messages: Self::to_api_messages(request),
        };

        Ok(WireRequest {
            url: self.messages_url(),
            headers: vec![
                ("x-api-key".into(), self.settings.api_key.clone()),
                ("anthropic-version".into(), ANTHROPIC_VERSION.into()),
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
        debug!(provider = "anthropic", model = %self.settings.model, url = %wire.url, "Sending completion request");
        http::send(&self.client, wire, self.timeout, cancel).await
    }

    fn parse(&self, raw: RawResponse) -> CanonicalResult {
        if !raw.is_success() {
            return Err(http::status_error(self.name(), &raw));
        }

        let api_resp: AnthropicResponse = http::decode(&raw)?;
        let text: String = api_resp
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        Ok(CanonicalResponse {
            content: http::non_blank(Some(text), raw.status)?,
            provider: ProviderKind::Anthropic,
            model: api_resp.model,
        })
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ResponseContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrochat_core::error::ErrorKind;
    use astrochat_core::message::ConversationTurn;

    fn adapter_at(endpoint: &str) -> AnthropicAdapter {
        AnthropicAdapter::new(ProviderSettings {
            provider: ProviderKind::Anthropic,
            api_key: "sk-ant-test".into(),
            model: "claude-3-5-haiku-latest".into(),
            endpoint: endpoint.into(),
            default_max_tokens: 1024,
        })
    }

    fn adapter() -> AnthropicAdapter {
        adapter_at("https://api.anthropic.com")
    }

    #[test]
    fn messages_url_variants() {
        assert_eq!(
            adapter().messages_url(),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            adapter_at("https://proxy.example.com/v1/").messages_url(),
            "https://proxy.example.com/v1/messages"
        );
    }

    #[test]
    fn translate_puts_system_top_level() {
        let request = CanonicalRequest::new("Will Saturn calm down?")
            .with_system_prompt("You are an astrologer.")
            .with_tail(vec![
                ConversationTurn::user("Hello").unwrap(),
                ConversationTurn::assistant("Hi there").unwrap(),
            ]);

        let wire = adapter().translate(&request).unwrap();
        assert_eq!(wire.header("x-api-key"), Some("sk-ant-test"));
        assert_eq!(wire.header("anthropic-version"), Some("2023-06-01"));
        assert_eq!(wire.header("authorization"), None);

        let body = &wire.body;
        assert_eq!(body["system"], "You are an astrologer.");
        assert_eq!(body["max_tokens"], 1024);
        // Sampling is temperature only
        assert!(body.get("top_p").is_none());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "text");
        assert_eq!(messages[0]["content"][0]["text"], "Hello");
        assert_eq!(messages[2]["content"][0]["text"], "Will Saturn calm down?");
    }

    #[test]
    fn translate_omits_absent_system() {
        let wire = adapter().translate(&CanonicalRequest::new("q")).unwrap();
        assert!(wire.body.get("system").is_none());
    }

    #[test]
    fn leading_assistant_dropped_and_same_roles_merged() {
        let request = CanonicalRequest::new("And now?").with_tail(vec![
            ConversationTurn::assistant("orphan answer").unwrap(),
            ConversationTurn::user("first").unwrap(),
            ConversationTurn::assistant("reply").unwrap(),
            ConversationTurn::user("unanswered").unwrap(),
        ]);
        let messages = AnthropicAdapter::to_api_messages(&request);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content[0].text, "first");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content.len(), 2);
        assert_eq!(messages[2].content[1].text, "And now?");
    }

    #[test]
    fn parse_joins_text_blocks() {
        let raw = RawResponse::new(
            200,
            r#"{"id":"msg_1","model":"claude-3-5-haiku-latest","content":[{"type":"text","text":"Saturn "},{"type":"text","text":"teaches patience."}],"stop_reason":"end_turn"}"#,
        );
        let response = adapter().parse(raw).unwrap();
        assert_eq!(response.content, "Saturn teaches patience.");
        assert_eq!(response.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn parse_no_text_blocks_is_empty() {
        let raw = RawResponse::new(200, r#"{"content":[]}"#);
        assert_eq!(
            adapter().parse(raw).unwrap_err().kind,
            ErrorKind::EmptyResponse
        );
    }

    #[test]
    fn parse_overloaded_is_http_error() {
        let raw = RawResponse::new(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        let err = adapter().parse(raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http(529));
        assert_eq!(err.provider_message.as_deref(), Some("Overloaded"));
    }
}
