//! Transport abstraction over the generation backend.

use super::BackendError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Message role (`system`, `user`, `assistant`).
    pub role: String,
    /// Message content.
    pub content: String,
}

/// OpenAI-compatible chat completion request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model name.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Output token budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether to request server-sent events.
    pub stream: bool,
}

impl ChatRequest {
    /// Builds a single-message request carrying `prompt`.
    #[must_use]
    pub fn from_prompt(
        model: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        stream: bool,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: prompt.into(),
            }],
            max_tokens,
            temperature,
            stream,
        }
    }

    /// Content of the last message.
    #[must_use]
    pub fn prompt(&self) -> &str {
        self.messages.last().map_or("", |m| m.content.as_str())
    }
}

/// Sends completion requests to a text-generation backend.
///
/// Implementations block the calling thread; the client runs them on worker
/// threads.
pub trait BackendTransport: Send + Sync {
    /// Transport name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Sends `request` and returns the generated text.
    ///
    /// `timeout` bounds the whole exchange including the body.
    fn send(&self, request: &ChatRequest, timeout: Duration) -> Result<String, BackendError>;

    /// Lightweight liveness probe.
    fn probe(&self, _timeout: Duration) -> bool {
        true
    }

    /// Drops pooled connections so the next call starts fresh.
    fn reset(&self) {}
}

/// Transport backed by a closure.
///
/// Used to plug an existing completion function into the client, and in
/// tests to script backend behavior.
pub struct FnTransport<F> {
    name: &'static str,
    call: F,
    healthy: AtomicBool,
    resets: AtomicU32,
}

impl<F> FnTransport<F>
where
    F: Fn(&ChatRequest, Duration) -> Result<String, BackendError> + Send + Sync,
{
    /// Wraps `call` under the given transport name.
    #[must_use]
    pub const fn new(name: &'static str, call: F) -> Self {
        Self {
            name,
            call,
            healthy: AtomicBool::new(true),
            resets: AtomicU32::new(0),
        }
    }

    /// Sets what [`BackendTransport::probe`] reports.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Number of times [`BackendTransport::reset`] was called.
    #[must_use]
    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::Acquire)
    }
}

impl<F> BackendTransport for FnTransport<F>
where
    F: Fn(&ChatRequest, Duration) -> Result<String, BackendError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn send(&self, request: &ChatRequest, timeout: Duration) -> Result<String, BackendError> {
        (self.call)(request, timeout)
    }

    fn probe(&self, _timeout: Duration) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::AcqRel);
    }
}
