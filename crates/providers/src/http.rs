//! Shared HTTP plumbing for all adapters.
//!
//! One POST per call. The exchange races the adapter deadline and the
//! caller's cancellation token; whichever finishes first wins. Status and
//! body classification common to every vendor lives here too.

use astrochat_core::error::{ErrorKind, ProviderError};
use astrochat_core::provider::{CanonicalRequest, ProviderSettings, RawResponse, WireRequest};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default deadline for one provider call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Send a translated request.
pub(crate) async fn send(
    client: &reqwest::Client,
    wire: WireRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RawResponse, ProviderError> {
    let mut builder = client.post(&wire.url).json(&wire.body);
    for (name, value) in &wire.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let exchange = async {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(transport_error)?;
        debug!(status, bytes = body.len(), "Provider responded");
        Ok(RawResponse {
            status,
            retry_after_secs,
            body,
        })
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::new(ErrorKind::Cancelled)),
        result = tokio::time::timeout(timeout, exchange) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::new(ErrorKind::Timeout)
                .with_message(format!("no response within {} ms", timeout.as_millis()))),
        },
    }
}

/// Map a reqwest failure onto the error taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_builder() {
        ErrorKind::InvalidEndpoint
    } else {
        ErrorKind::Network
    };
    ProviderError::new(kind).with_cause(err)
}

/// `Retry-After` in its delta-seconds form. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Reject settings no request could succeed with.
pub(crate) fn check_settings(settings: &ProviderSettings) -> Result<(), ProviderError> {
    if settings.api_key.trim().is_empty() {
        return Err(ProviderError::new(ErrorKind::Unauthorized).with_message("missing API key"));
    }

    let endpoint = settings.endpoint.trim();
    if endpoint.is_empty() {
        return Err(ProviderError::new(ErrorKind::InvalidEndpoint).with_message("empty endpoint"));
    }
    match reqwest::Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ProviderError::new(ErrorKind::InvalidEndpoint)
            .with_message(format!("unsupported scheme '{}'", url.scheme()))),
        Err(e) => Err(ProviderError::new(ErrorKind::InvalidEndpoint).with_cause(e)),
    }
}

/// The token limit to send; a request that resolves to zero is refused.
pub(crate) fn max_tokens(
    request: &CanonicalRequest,
    settings: &ProviderSettings,
) -> Result<u32, ProviderError> {
    match request.effective_max_tokens(settings) {
        0 => Err(ProviderError::new(ErrorKind::InvalidRequest)
            .with_message("max_tokens must be greater than zero")),
        n => Ok(n),
    }
}

/// Classify a non-2xx response by status code.
pub(crate) fn status_error(provider: &str, raw: &RawResponse) -> ProviderError {
    warn!(provider, status = raw.status, body = %raw.body, "Provider returned error");

    let kind = match raw.status {
        401 | 403 => ErrorKind::Unauthorized,
        429 => ErrorKind::RateLimited,
        404 => ErrorKind::InvalidEndpoint,
        status => ErrorKind::Http(status),
    };
    let mut err = ProviderError::new(kind)
        .with_status(raw.status)
        .with_retry_after(raw.retry_after_secs);
    if let Some(message) = error_message(&raw.body) {
        err = err.with_message(message);
    }
    err
}

/// Pull a human-readable message out of a vendor error body.
///
/// Handles `{error:{message}}`, `{error:"..."}` and `{message}`.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = match &value["error"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from),
        _ => value["message"].as_str().map(String::from),
    };
    message.filter(|m| !m.trim().is_empty())
}

/// Decode a 2xx body into the vendor's response type.
pub(crate) fn decode<T: DeserializeOwned>(raw: &RawResponse) -> Result<T, ProviderError> {
    if raw.body.trim().is_empty() {
        return Err(ProviderError::new(ErrorKind::EmptyResponse).with_status(raw.status));
    }
    serde_json::from_str(&raw.body).map_err(|e| {
        warn!(status = raw.status, body = %raw.body, "Undecodable provider response");
        ProviderError::new(ErrorKind::MalformedResponse)
            .with_status(raw.status)
            .with_cause(e)
    })
}

/// The generated text, or `EmptyResponse` when it is absent or blank.
pub(crate) fn non_blank(content: Option<String>, status: u16) -> Result<String, ProviderError> {
    content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProviderError::new(ErrorKind::EmptyResponse).with_status(status))
}

/// Serialize a typed request body.
pub(crate) fn to_body<T: serde::Serialize>(body: &T) -> Result<serde_json::Value, ProviderError> {
    serde_json::to_value(body)
        .map_err(|e| ProviderError::new(ErrorKind::MalformedResponse).with_cause(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrochat_core::provider::ProviderKind;

    fn settings(api_key: &str, endpoint: &str) -> ProviderSettings {
        ProviderSettings {
            provider: ProviderKind::OpenAi,
            api_key: api_key.into(),
            model: "m".into(),
            endpoint: endpoint.into(),
            default_max_tokens: 64,
        }
    }

    #[test]
    fn status_classification() {
        let cases = [
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Unauthorized),
            (429, ErrorKind::RateLimited),
            (404, ErrorKind::InvalidEndpoint),
            (500, ErrorKind::Http(500)),
            (400, ErrorKind::Http(400)),
        ];
        for (status, kind) in cases {
            let err = status_error("test", &RawResponse::new(status, ""));
            assert_eq!(err.kind, kind, "status {status}");
            assert_eq!(err.http_status, Some(status));
        }
    }

    #[test]
    fn status_error_keeps_provider_message_and_retry_after() {
        let mut raw = RawResponse::new(429, r#"{"error":{"message":"slow down"}}"#);
        raw.retry_after_secs = Some(7);
        let err = status_error("test", &raw);
        assert_eq!(err.provider_message.as_deref(), Some("slow down"));
        assert_eq!(err.retry_after_secs, Some(7));
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":"Model is currently loading"}"#).as_deref(),
            Some("Model is currently loading")
        );
        assert_eq!(
            error_message(r#"{"message":"bad request"}"#).as_deref(),
            Some("bad request")
        );
        assert_eq!(error_message("<html>oops</html>"), None);
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after(" 12 "), Some(12));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn settings_preconditions() {
        assert!(check_settings(&settings("k", "https://api.openai.com/v1")).is_ok());
        assert!(check_settings(&settings("k", "http://127.0.0.1:9000")).is_ok());
        assert_eq!(
            check_settings(&settings("  ", "https://api.openai.com/v1"))
                .unwrap_err()
                .kind,
            ErrorKind::Unauthorized
        );
        for endpoint in ["", "api.openai.com", "ftp://example.com"] {
            assert_eq!(
                check_settings(&settings("k", endpoint)).unwrap_err().kind,
                ErrorKind::InvalidEndpoint,
                "endpoint {endpoint:?}"
            );
        }
    }

    #[test]
    fn zero_token_limit_is_refused() {
        let mut zero = settings("k", "https://api.openai.com/v1");
        zero.default_max_tokens = 0;

        let err = max_tokens(&CanonicalRequest::new("q"), &zero).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        // An explicit request limit still wins over the provider default
        assert_eq!(
            max_tokens(&CanonicalRequest::new("q").with_max_tokens(32), &zero).unwrap(),
            32
        );
    }

    #[test]
    fn decode_distinguishes_empty_from_malformed() {
        #[derive(Debug, serde::Deserialize)]
        struct Shape {
            #[allow(dead_code)]
            value: u32,
        }
        let empty = decode::<Shape>(&RawResponse::new(200, "  ")).unwrap_err();
        assert_eq!(empty.kind, ErrorKind::EmptyResponse);
        let malformed = decode::<Shape>(&RawResponse::new(200, "{not json")).unwrap_err();
        assert_eq!(malformed.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn non_blank_trims() {
        assert_eq!(non_blank(Some("  hi \n".into()), 200).unwrap(), "hi");
        assert_eq!(
            non_blank(Some("   ".into()), 200).unwrap_err().kind,
            ErrorKind::EmptyResponse
        );
        assert_eq!(
            non_blank(None, 200).unwrap_err().kind,
            ErrorKind::EmptyResponse
        );
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let token = CancellationToken::new();
        token.cancel();
        let wire = WireRequest {
            url: "http://127.0.0.1:9/never".into(),
            headers: vec![],
            body: serde_json::json!({}),
        };
        let err = send(&reqwest::Client::new(), wire, DEFAULT_TIMEOUT, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
