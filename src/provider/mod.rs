pub mod mock;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// One outbound completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub api_key: &'a str,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Token counts as reported by the provider. Any of them may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt: Option<u32>,
    pub completion: Option<u32>,
    pub total: Option<u32>,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt: Some(prompt),
            completion: Some(completion),
            total: Some(prompt.saturating_add(completion)),
        }
    }
}

/// Outcome of a provider call. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderResponse {
    pub success: bool,
    pub text: String,
    pub usage: TokenUsage,
    pub model_used: String,
    pub error_message: Option<String>,
    pub elapsed: Duration,
}

impl ProviderResponse {
    pub fn success(text: impl Into<String>, usage: TokenUsage, model_used: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            usage,
            model_used: model_used.into(),
            error_message: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            usage: TokenUsage::default(),
            model_used: String::new(),
            error_message: Some(message.into()),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// A text-generation backend. Exactly one call per task; no retries.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest<'_>) -> ProviderResponse;
}
