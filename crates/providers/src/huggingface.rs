//! HuggingFace Inference API adapter.
//!
//! Text-generation models take a single `inputs` string, so the system
//! prompt and conversation are flattened into a `Role: text` transcript
//! ending with an open `Assistant:` line. Cold models answer with
//! `{"error": "... is currently loading", "estimated_time": ...}`, which is
//! the one HuggingFace-specific transient failure.

use async_trait::async_trait;
use astrochat_core::error::{ErrorKind, ProviderError};
use astrochat_core::message::Role;
use astrochat_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http;

/// HuggingFace Inference API adapter.
pub struct HuggingFaceAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
    timeout: Duration,
}

impl HuggingFaceAdapter {
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

    /// `{endpoint}/{model}`, unless the endpoint already names the model.
    fn model_url(&self) -> String {
        let base = self.settings.endpoint.trim_end_matches('/');
        let model = self.settings.model.trim_matches('/');
        if model.is_empty() || base.ends_with(&format!("/{model}")) {
            base.to_string()
        } else {
            format!("{base}/{model}")
        }
    }

    /// Flatten the conversation into one instruction string.
    fn format_inputs(request: &CanonicalRequest) -> String {
        let mut prompt = String::new();
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("System: ");
            prompt.push_str(system);
            prompt.push_str("\n\n");
        }
        for turn in &request.tail {
            let role = match turn.role() {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(role);
            prompt.push_str(": ");
            prompt.push_str(turn.content());
            prompt.push_str("\n\n");
        }
        prompt.push_str("User: ");
        prompt.push_str(&request.user_prompt);
        prompt.push_str("\n\nAssistant:");
        prompt
    }

    /// A cold-start marker, regardless of status code.
    fn loading_error(raw: &RawResponse) -> Option<ProviderError> {
        let body: HfErrorBody = serde_json::from_str(&raw.body).ok()?;
        if !body.error.to_ascii_lowercase().contains("currently loading") {
            return None;
        }

        let retry_after = raw.retry_after_secs.or_else(|| {
            body.estimated_time
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(|t| t.ceil() as u64)
        });
        warn!(status = raw.status, estimated_time = ?body.estimated_time, "HuggingFace model is loading");

        Some(
            ProviderError::new(ErrorKind::ModelLoading)
                .with_status(raw.status)
                .with_message(body.error)
                .with_retry_after(retry_after),
        )
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn translate(&self, request: &CanonicalRequest) -> Result<WireRequest, ProviderError> {
        http::check_settings(&self.settings)?;

        let body = HfRequest {
            inputs: Self::format_inputs(request),
            parameters: HfParameters {
                max_new_tokens: http::max_tokens(request, &self.settings)?,
                temperature: request.temperature,
                top_p: request.top_p,
                do_sample: request.temperature > 0.0,
                return_full_text: false,
            },
        };

        Ok(WireRequest {
            url: self.model_url(),
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
        debug!(provider = "huggingface", model = %self.settings.model, url = %wire.url, "Sending generation request");
        http::send(&self.client, wire, self.timeout, cancel).await
    }

    fn parse(&self, raw: RawResponse) -> CanonicalResult {
        if let Some(err) = Self::loading_error(&raw) {
            return Err(err);
        }
        if !raw.is_success() {
            return Err(http::status_error(self.name(), &raw));
        }

        let text = match http::decode::<HfResponse>(&raw)? {
            HfResponse::Error(body) => {
                warn!(status = raw.status, error = %body.error, "HuggingFace returned an error body");
                return Err(ProviderError::new(ErrorKind::MalformedResponse)
                    .with_status(raw.status)
                    .with_message(body.error));
            }
            HfResponse::Batch(items) => items.into_iter().next().map(|g| g.generated_text),
            HfResponse::Single(item) => Some(item.generated_text),
        };

        Ok(CanonicalResponse {
            content: http::non_blank(text, raw.status)?,
            provider: ProviderKind::HuggingFace,
            model: Some(self.settings.model.clone()),
        })
    }
}

// --- HuggingFace API types ---

#[derive(Debug, Serialize)]
struct HfRequest {
    inputs: String,
    parameters: HfParameters,
}

#[derive(Debug, Serialize)]
struct HfParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    do_sample: bool,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct HfErrorBody {
    error: String,
    #[serde(default)]
    estimated_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Generated {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfResponse {
    Error(HfErrorBody),
    Batch(Vec<Generated>),
    Single(Generated),
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrochat_core::message::ConversationTurn;

    fn adapter_with(endpoint: &str, model: &str) -> HuggingFaceAdapter {
        HuggingFaceAdapter::new(ProviderSettings {
            provider: ProviderKind::HuggingFace,
            api_key: "hf_test".into(),
            model: model.into(),
            endpoint: endpoint.into(),
            default_max_tokens: 256,
        })
    }

    fn adapter() -> HuggingFaceAdapter {
        adapter_with(
            "https://api-inference.huggingface.co/models",
            "mistralai/Mistral-7B-Instruct-v0.3",
        )
    }

    #[test]
    fn model_url_variants() {
        assert_eq!(
            adapter().model_url(),
            "https://api-inference.huggingface.co/models/mistralai/Mistral-7B-Instruct-v0.3"
        );
        assert_eq!(
            adapter_with("https://my-endpoint.hf.cloud/org/model/", "org/model").model_url(),
            "https://my-endpoint.hf.cloud/org/model"
        );
    }

    #[test]
    fn inputs_transcript_format() {
        let request = CanonicalRequest::new("What about Mars?")
            .with_system_prompt("Be brief.")
            .with_tail(vec![
                ConversationTurn::user("Hi").unwrap(),
                ConversationTurn::assistant("Hello").unwrap(),
            ]);
        assert_eq!(
            HuggingFaceAdapter::format_inputs(&request),
            "System: Be brief.\n\nUser: Hi\n\nAssistant: Hello\n\nUser: What about Mars?\n\nAssistant:"
        );
    }

    #[test]
    fn translate_parameters() {
        let wire = adapter()
            .translate(&CanonicalRequest::new("q").with_sampling(0.0, 0.9))
            .unwrap();
        assert_eq!(wire.header("Authorization"), Some("Bearer hf_test"));
        let params = &wire.body["parameters"];
        assert_eq!(params["max_new_tokens"], 256);
        assert_eq!(params["do_sample"], false);
        assert_eq!(params["return_full_text"], false);

        let wire = adapter().translate(&CanonicalRequest::new("q")).unwrap();
        assert_eq!(wire.body["parameters"]["do_sample"], true);
    }

    #[test]
    fn parse_array_and_object_shapes() {
        let batch = RawResponse::new(200, r#"[{"generated_text":" Mars energizes you."}]"#);
        assert_eq!(adapter().parse(batch).unwrap().content, "Mars energizes you.");

        let single = RawResponse::new(200, r#"{"generated_text":"Mars again."}"#);
        assert_eq!(adapter().parse(single).unwrap().content, "Mars again.");
    }

    #[test]
    fn loading_is_transient_with_estimated_time() {
        let raw = RawResponse::new(
            503,
            r#"{"error":"Model mistralai/Mistral-7B-Instruct-v0.3 is currently loading","estimated_time":20.4}"#,
        );
        let err = adapter().parse(raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelLoading);
        assert!(err.is_transient());
        assert_eq!(err.retry_after_secs, Some(21));
        assert_eq!(err.http_status, Some(503));
    }

    #[test]
    fn other_error_bodies_are_permanent() {
        let raw = RawResponse::new(400, r#"{"error":"Input validation error"}"#);
        let err = adapter().parse(raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http(400));
        assert!(!err.is_transient());

        let raw = RawResponse::new(200, r#"{"error":"something odd"}"#);
        assert_eq!(
            adapter().parse(raw).unwrap_err().kind,
            ErrorKind::MalformedResponse
        );
    }

    #[test]
    fn missing_generated_text_is_malformed() {
        for body in [r#"{"unexpected":true}"#, r#"[{"unexpected":true}]"#] {
            let raw = RawResponse::new(200, body);
            assert_eq!(
                adapter().parse(raw).unwrap_err().kind,
                ErrorKind::MalformedResponse,
                "{body}"
            );
        }
    }

    #[test]
    fn blank_generated_text_is_empty_response() {
        let raw = RawResponse::new(200, r#"[{"generated_text":"   "}]"#);
        assert_eq!(
            adapter().parse(raw).unwrap_err().kind,
            ErrorKind::EmptyResponse
        );
    }

    #[test]
    fn empty_batch_is_empty_response() {
        let raw = RawResponse::new(200, "[]");
        assert_eq!(
            adapter().parse(raw).unwrap_err().kind,
            ErrorKind::EmptyResponse
        );
    }
}
