//! HTTP transport for OpenAI-compatible completion servers.

use super::{BackendError, BackendTransport, ChatRequest};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Default completion endpoint of a local `KoboldCpp` server.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5001/v1/chat/completions";

/// Maximum number of body bytes kept in status errors.
const MAX_ERROR_BODY: usize = 200;

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Chat completion endpoint.
    pub endpoint: String,
    /// Health endpoint; derived from `endpoint` when unset.
    pub health_endpoint: Option<String>,
    /// Optional bearer token.
    pub api_key: Option<SecretString>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            health_endpoint: None,
            api_key: None,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl HttpTransportConfig {
    /// Sets the completion endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    /// Health endpoint: the explicit one, or the models listing next to the
    /// completion endpoint.
    #[must_use]
    pub fn resolved_health_endpoint(&self) -> String {
        if let Some(endpoint) = &self.health_endpoint {
            return endpoint.clone();
        }
        self.endpoint.strip_suffix("/chat/completions").map_or_else(
            || format!("{}/models", self.endpoint.trim_end_matches('/')),
            |base| format!("{base}/models"),
        )
    }
}

/// Blocking HTTP transport.
///
/// The underlying client is rebuilt on [`BackendTransport::reset`], which
/// discards any pooled connection left in a bad state by a truncated
/// response.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: RwLock<reqwest::blocking::Client>,
}

impl HttpTransport {
    /// Creates a transport for the given configuration.
    #[must_use]
    pub fn new(config: HttpTransportConfig) -> Self {
        let client = build_client(config.connect_timeout);
        Self {
            config,
            client: RwLock::new(client),
        }
    }

    /// Transport configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn client(&self) -> reqwest::blocking::Client {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BackendTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&self, request: &ChatRequest, timeout: Duration) -> Result<String, BackendError> {
        let mut builder = self
            .client()
            .post(&self.config.endpoint)
            .timeout(timeout)
            .json(request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder
            .send()
            .map_err(|e| map_request_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        if request.stream {
            parse_event_stream(BufReader::new(response))
        } else {
            let body = response
                .text()
                .map_err(|e| map_body_error(&e, timeout))?;
            parse_completion_body(&body)
        }
    }

    fn probe(&self, timeout: Duration) -> bool {
        let endpoint = self.config.resolved_health_endpoint();
        let mut builder = self.client().get(&endpoint).timeout(timeout);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        match builder.send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "Health probe failed");
                false
            },
        }
    }

    fn reset(&self) {
        let fresh = build_client(self.config.connect_timeout);
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::info!(endpoint = %self.config.endpoint, "Rebuilt backend HTTP session");
    }
}

fn build_client(connect_timeout: Duration) -> reqwest::blocking::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::CONNECTION,
        reqwest::header::HeaderValue::from_static("close"),
    );
    reqwest::blocking::Client::builder()
        .connect_timeout(connect_timeout)
        .default_headers(headers)
        .user_agent(concat!("extractd/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!("Failed to build backend HTTP client: {err}");
            reqwest::blocking::Client::new()
        })
}

fn map_request_error(err: &reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_body() || err.is_decode() {
        BackendError::Incomplete(err.to_string())
    } else {
        BackendError::Connection(err.to_string())
    }
}

fn map_body_error(err: &reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Incomplete(err.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<ChoiceContent>,
    #[serde(default)]
    delta: Option<ChoiceContent>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionChoice {
    fn into_text(self) -> Option<String> {
        self.message
            .and_then(|m| m.content)
            .or_else(|| self.delta.and_then(|d| d.content))
            .or(self.text)
    }
}

fn map_json_error(err: &serde_json::Error) -> BackendError {
    if err.is_eof() {
        BackendError::Incomplete(err.to_string())
    } else {
        BackendError::Malformed(err.to_string())
    }
}

/// Extracts the generated text from a non-streaming completion body.
///
/// A body cut off mid-document is reported as [`BackendError::Incomplete`];
/// anything else that does not parse is [`BackendError::Malformed`].
pub fn parse_completion_body(body: &str) -> Result<String, BackendError> {
    let parsed: CompletionBody = serde_json::from_str(body).map_err(|e| map_json_error(&e))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(CompletionChoice::into_text)
        .ok_or_else(|| BackendError::Malformed("completion has no choices".to_string()))
}

/// Accumulates a server-sent event stream into the generated text.
///
/// The stream must end with a `data: [DONE]` sentinel; ending without one is
/// [`BackendError::Incomplete`].
pub fn parse_event_stream<R: BufRead>(reader: R) -> Result<String, BackendError> {
    let mut text = String::new();
    for line in reader.lines() {
        let line = line.map_err(|e| BackendError::Incomplete(e.to_string()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            return Ok(text);
        }
        let chunk: CompletionBody =
            serde_json::from_str(payload).map_err(|e| map_json_error(&e))?;
        if let Some(piece) = chunk
            .choices
            .into_iter()
            .next()
            .and_then(CompletionChoice::into_text)
        {
            text.push_str(&piece);
        }
    }
    Err(BackendError::Incomplete(
        "event stream ended before [DONE]".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_body() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"intent\":\"statement\"}"}}]}"#;
        assert_eq!(
            parse_completion_body(body),
            Ok(r#"{"intent":"statement"}"#.to_string())
        );
    }

    #[test]
    fn test_parse_completion_body_accepts_text_choices() {
        let body = r#"{"choices":[{"text":"hello"}]}"#;
        assert_eq!(parse_completion_body(body), Ok("hello".to_string()));
    }

    #[test]
    fn test_truncated_body_is_incomplete() {
        let body = r#"{"choices":[{"message":{"content":"hel"#;
        assert!(matches!(
            parse_completion_body(body),
            Err(BackendError::Incomplete(_))
        ));
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        assert!(matches!(
            parse_completion_body("<html>502 Bad Gateway</html>"),
            Err(BackendError::Malformed(_))
        ));
        assert!(matches!(
            parse_completion_body(r#"{"choices":[]}"#),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_event_stream_accumulates_deltas() {
        let stream = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                      : keep-alive\n\
                      data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                      data: [DONE]\n";
        assert_eq!(parse_event_stream(stream.as_bytes()), Ok("Hello".to_string()));
    }

    #[test]
    fn test_event_stream_without_done_is_incomplete() {
        let stream = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n";
        assert!(matches!(
            parse_event_stream(stream.as_bytes()),
            Err(BackendError::Incomplete(_))
        ));
    }

    #[test]
    fn test_health_endpoint_derivation() {
        let config = HttpTransportConfig::default();
        assert_eq!(
            config.resolved_health_endpoint(),
            "http://localhost:5001/v1/models"
        );

        let custom = HttpTransportConfig::default().with_endpoint("http://gpu:8080/generate");
        assert_eq!(
            custom.resolved_health_endpoint(),
            "http://gpu:8080/generate/models"
        );
    }

    #[test]
    fn test_unreachable_backend_maps_to_transient_error() {
        let transport = HttpTransport::new(
            HttpTransportConfig::default()
                .with_endpoint("http://127.0.0.1:9/v1/chat/completions"),
        );
        let request = ChatRequest::from_prompt("m", "hi", 8, 0.0, false);
        let err = transport
            .send(&request, Duration::from_millis(500))
            .err();
        assert!(err.is_some_and(|e| e.is_transient()));
        assert!(!transport.probe(Duration::from_millis(200)));
    }
}
