use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CompletionRequest, Provider, ProviderResponse, TokenUsage};
use crate::config::ProviderConfig;
use crate::consts::MAX_TOKENS_CEILING;
use crate::params::clamp_temperature;

const NO_CONTENT: &str = "No content generated";

/// Chat-completions client for the OpenAI HTTP API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn send(&self, request: &CompletionRequest<'_>) -> ProviderResponse {
        let messages = [Message {
            role: "user",
            content: request.prompt,
        }];
        let body = ApiRequest {
            model: request.model,
            messages: &messages,
            max_tokens: request.max_tokens.clamp(1, MAX_TOKENS_CEILING),
            temperature: clamp_temperature(request.temperature),
            stream: false,
        };

        let resp = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(request.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ProviderResponse::failure(describe_transport_error(&e)),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => return ProviderResponse::failure(describe_transport_error(&e)),
        };

        if !status.is_success() {
            return ProviderResponse::failure(describe_status(status, &text));
        }
        parse_success(&text, request.model)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> ProviderResponse {
        let started = Instant::now();
        debug!(model = request.model, prompt_chars = request.prompt.chars().count(), "calling OpenAI");
        let response = self.send(request).await.with_elapsed(started.elapsed());
        if let Some(error) = &response.error_message {
            warn!(model = request.model, error = %error, "OpenAI call failed");
        }
        response
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timed out while waiting for OpenAI API response".to_string()
    } else if e.is_decode() {
        format!("Error parsing OpenAI API response: {e}")
    } else {
        format!("Network error while calling OpenAI API: {e}")
    }
}

/// Human-readable message for a non-2xx response.
fn describe_status(status: StatusCode, body: &str) -> String {
    let code = status.as_u16();
    if let Ok(ApiErrorResponse {
        error: Some(ApiError {
            message: Some(message),
        }),
    }) = serde_json::from_str::<ApiErrorResponse>(body)
    {
        return format!("OpenAI API Error ({code}): {message}");
    }

    match code {
        400 => format!("Bad Request ({code}): The request was invalid or malformed"),
        401 => format!("Unauthorized ({code}): Invalid or missing API key"),
        403 => format!("Forbidden ({code}): Access denied to the requested resource"),
        404 => format!("Not Found ({code}): The requested resource was not found"),
        429 => format!("Too Many Requests ({code}): Rate limit exceeded, please try again later"),
        500 => format!("Internal Server Error ({code}): OpenAI service is experiencing issues"),
        503 => format!("Service Unavailable ({code}): OpenAI service is temporarily unavailable"),
        _ => format!("HTTP Error ({code}): {body}"),
    }
}

fn parse_success(body: &str, requested_model: &str) -> ProviderResponse {
    let api: ApiResponse = match serde_json::from_str(body) {
        Ok(api) => api,
        Err(e) => return ProviderResponse::failure(format!("Error parsing OpenAI API response: {e}")),
    };

    let text = api
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_else(|| NO_CONTENT.to_string());

    let usage = api
        .usage
        .map(|u| TokenUsage {
            prompt: u.prompt_tokens,
            completion: u.completion_tokens,
            total: u.total_tokens,
        })
        .unwrap_or_default();

    let model = api
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| requested_model.to_string());

    ProviderResponse::success(text, usage, model)
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message<'a>],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}
