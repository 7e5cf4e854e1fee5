use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::consts::API_KEY_PLACEHOLDERS;
use crate::models::{TaskId, TaskResult, TaskStatus};
use crate::params::{self, ParameterDefaults};
use crate::provider::{CompletionRequest, Provider};
use crate::settings::secret::SecretResolver;
use crate::store::{ModelStore, ResultStore, TaskStore};

/// How a single `process` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    /// The task was not ours to finish: the id was unknown, the task was not
    /// `Queued`, or it left `Processing` before its terminal status was written.
    Skipped,
}

/// Runs one task from `Queued` to a terminal status.
///
/// Everything the worker touches is behind a trait so tests can replace any
/// piece. Built once per engine start by the init closure.
pub struct TaskProcessor {
    tasks: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    models: Arc<dyn ModelStore>,
    secrets: Arc<dyn SecretResolver>,
    provider: Arc<dyn Provider>,
    defaults: ParameterDefaults,
}

impl TaskProcessor {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        models: Arc<dyn ModelStore>,
        secrets: Arc<dyn SecretResolver>,
        provider: Arc<dyn Provider>,
        defaults: ParameterDefaults,
    ) -> Self {
        Self {
            tasks,
            results,
            models,
            secrets,
            provider,
            defaults,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn tasks(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    /// Process one task id. Never returns an error: anything unexpected marks
    /// the task `Failed` (when it is in a state that allows it) and is logged.
    pub async fn process(&self, id: TaskId) -> Outcome {
        match self.try_process(id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail_unexpected(id, &format!("{e:#}")).await;
                Outcome::Failed
            }
        }
    }

    /// Record an unexpected failure against a task.
    pub async fn fail_unexpected(&self, id: TaskId, detail: &str) {
        let message = format!("Unexpected error during processing: {detail}");
        error!(task_id = %id, error = %detail, "task processing failed unexpectedly");
        match self
            .tasks
            .update_status(id, TaskStatus::Failed, Utc::now(), Some(&message))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                task_id = %id,
                "could not mark task failed, it was not processing"
            ),
            Err(e) => error!(task_id = %id, error = %e, "failed to record task failure"),
        }
    }

    async fn try_process(&self, id: TaskId) -> Result<Outcome> {
        let Some(task) = self.tasks.get(id).await? else {
            warn!(task_id = %id, "task not found");
            return Ok(Outcome::Skipped);
        };
        if task.status != TaskStatus::Queued {
            warn!(task_id = %id, status = %task.status, "task is not queued, skipping");
            return Ok(Outcome::Skipped);
        }
        if !self
            .tasks
            .update_status(id, TaskStatus::Processing, Utc::now(), None)
            .await?
        {
            warn!(task_id = %id, "task left the queued state before processing began");
            return Ok(Outcome::Skipped);
        }
        debug!(task_id = %id, "processing");

        let model = match self.models.get(task.model_config_id).await? {
            Some(model) if model.active => model,
            _ => {
                let message = format!(
                    "AI model configuration {} not found or inactive",
                    task.model_config_id
                );
                return self.fail(id, &message).await;
            }
        };

        let api_key = self
            .secrets
            .resolve_secret(&model.api_key_setting)
            .filter(|key| !is_placeholder_key(key));
        let Some(api_key) = api_key else {
            return self
                .fail(id, "API key not configured or is a placeholder value")
                .await;
        };

        let params = params::resolve(task.max_tokens, task.temperature, &model, &self.defaults);
        info!(
            task_id = %id,
            model = %model.identifier,
            provider = self.provider.name(),
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            "calling provider"
        );
        let request = CompletionRequest {
            prompt: &task.prompt,
            model: &model.identifier,
            api_key: &api_key,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };
        let started = Instant::now();
        let response = self.provider.complete(&request).await;

        let elapsed = if response.elapsed.is_zero() {
            started.elapsed()
        } else {
            response.elapsed
        };
        let failure = (!response.success).then(|| {
            response
                .error_message
                .clone()
                .unwrap_or_else(|| "AI processing failed with unknown error".to_string())
        });
        let result = TaskResult {
            task_id: id,
            content: failure.clone().unwrap_or_else(|| response.text.clone()),
            prompt_tokens: response.usage.prompt,
            completion_tokens: response.usage.completion,
            total_tokens: response.usage.total,
            processing_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
            model_used: if response.model_used.is_empty() {
                model.identifier.clone()
            } else {
                response.model_used.clone()
            },
            success: response.success,
            created_at: Utc::now(),
        };
        if let Err(e) = self.results.insert(&result).await {
            error!(task_id = %id, error = %e, "failed to save task result");
        }

        if let Some(message) = failure {
            return self.fail(id, &message).await;
        }
        if !self
            .tasks
            .update_status(id, TaskStatus::Completed, Utc::now(), None)
            .await?
        {
            warn!(task_id = %id, "task left processing before it could be completed");
            return Ok(Outcome::Skipped);
        }
        info!(
            task_id = %id,
            elapsed_ms = result.processing_ms,
            total_tokens = ?result.total_tokens,
            "task completed"
        );
        Ok(Outcome::Completed)
    }

    async fn fail(&self, id: TaskId, message: &str) -> Result<Outcome> {
        if !self
            .tasks
            .update_status(id, TaskStatus::Failed, Utc::now(), Some(message))
            .await?
        {
            warn!(task_id = %id, error = message, "task left processing before it could be failed");
            return Ok(Outcome::Skipped);
        }
        error!(task_id = %id, error = message, "task failed");
        Ok(Outcome::Failed)
    }
}

/// Blank keys and the seeded sample values never reach the provider.
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    if key.is_empty() {
        return true;
    }
    let lower = key.to_lowercase();
    API_KEY_PLACEHOLDERS
        .iter()
        .any(|marker| lower.contains(&marker.to_lowercase()))
}
