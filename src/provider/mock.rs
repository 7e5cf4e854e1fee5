use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CompletionRequest, Provider, ProviderResponse, TokenUsage};

const PREVIEW_CHARS: usize = 100;

/// Parameters of one call, as the mock saw them.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// An offline provider for demos and tests.
///
/// Without a script it echoes the prompt back, counting words as tokens.
/// With a script it returns the scripted responses in order and fails once
/// they run out.
pub struct MockProvider {
    script: Option<Mutex<VecDeque<ProviderResponse>>>,
    delay: Duration,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(responses: Vec<ProviderResponse>) -> Self {
        Self {
            script: Some(Mutex::new(responses.into())),
            ..Self::new()
        }
    }

    /// Sleep this long inside every call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How many times `complete` has been entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every call made so far, oldest first.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }

    fn next_response(&self, request: &CompletionRequest<'_>) -> ProviderResponse {
        let Some(script) = &self.script else {
            return echo(request);
        };
        let call = self.calls();
        script.lock().unwrap().pop_front().unwrap_or_else(|| {
            ProviderResponse::failure(format!("mock provider: no more responses (call {call})"))
        })
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> ProviderResponse {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(RecordedCall {
            prompt: request.prompt.to_string(),
            model: request.model.to_string(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.next_response(request);
        let elapsed = if response.elapsed.is_zero() {
            started.elapsed()
        } else {
            response.elapsed
        };
        response.with_elapsed(elapsed)
    }
}

fn echo(request: &CompletionRequest<'_>) -> ProviderResponse {
    let prompt_tokens = word_count(request.prompt);
    let text = format!("[mock:{}] {}", request.model, preview(request.prompt));
    let completion_tokens = word_count(&text).min(request.max_tokens);
    ProviderResponse::success(
        text,
        TokenUsage::new(prompt_tokens, completion_tokens),
        request.model,
    )
}

fn preview(prompt: &str) -> String {
    let prompt = prompt.trim();
    match prompt.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &prompt[..cut]),
        None => prompt.to_string(),
    }
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest<'_> {
        CompletionRequest {
            prompt,
            model: "gpt-4o-mini",
            api_key: "sk-test",
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn echo_mode_counts_words() {
        let mock = MockProvider::new();
        let response = mock.complete(&request("hello brave new world")).await;
        assert!(response.success);
        assert!(response.text.contains("hello brave new world"));
        assert_eq!(response.usage.prompt, Some(4));
        assert_eq!(response.model_used, "gpt-4o-mini");
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.recorded()[0].max_tokens, 100);
    }

    #[tokio::test]
    async fn scripted_responses_then_exhaustion() {
        let mock = MockProvider::scripted(vec![ProviderResponse::success(
            "first",
            TokenUsage::new(1, 1),
            "m",
        )]);
        assert_eq!(mock.complete(&request("a")).await.text, "first");
        let second = mock.complete(&request("b")).await;
        assert!(!second.success);
        assert!(second.error_message.unwrap().contains("no more responses"));
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn long_prompts_are_truncated_in_the_echo() {
        let long = "x".repeat(250);
        let shown = preview(&long);
        assert_eq!(shown.len(), PREVIEW_CHARS + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(preview("  short  "), "short");
    }

    #[tokio::test]
    async fn delay_is_applied() {
        let mock = MockProvider::new().with_delay(Duration::from_millis(30));
        let response = mock.complete(&request("slow")).await;
        assert!(response.elapsed >= Duration::from_millis(30));
    }
}
