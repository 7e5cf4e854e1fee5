//! Producer-facing API: submit tasks and read them back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::consts::{MAX_PROMPT_CHARS, MAX_TEMPERATURE, MAX_TOKENS_CEILING, MIN_TEMPERATURE};
use crate::engine::TaskQueue;
use crate::error::SubmitError;
use crate::models::{
    ModelConfig, ModelConfigId, NewModelConfig, NewTask, Task, TaskId, TaskResult, TaskStatus,
    UserId, UserStats,
};
use crate::params::{self, ParameterDefaults};
use crate::store::{ModelStore, ResultStore, TaskStore};

const SETTLE_POLL: Duration = Duration::from_millis(50);

/// A task as submitted by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub user_id: UserId,
    pub model_config_id: ModelConfigId,
    pub name: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl SubmitRequest {
    pub fn new(user_id: UserId, model_config_id: ModelConfigId, prompt: impl Into<String>) -> Self {
        Self {
            user_id,
            model_config_id,
            name: None,
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A task together with its result, if it has one yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDetails {
    pub task: Task,
    pub result: Option<TaskResult>,
}

pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    models: Arc<dyn ModelStore>,
    queue: Arc<TaskQueue>,
    defaults: ParameterDefaults,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        models: Arc<dyn ModelStore>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            tasks,
            results,
            models,
            queue,
            defaults: ParameterDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ParameterDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Validate, persist, mark `Queued`, and hand the id to the worker.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, SubmitError> {
        if request.user_id.0 <= 0 {
            return Err(SubmitError::InvalidUser);
        }
        if request.model_config_id.0 <= 0 {
            return Err(SubmitError::InvalidModel);
        }
        validate_parameters(&request.prompt, request.max_tokens, request.temperature)?;

        let model = self
            .models
            .get(request.model_config_id)
            .await?
            .ok_or(SubmitError::ModelNotFound(request.model_config_id))?;
        if !model.active {
            return Err(SubmitError::ModelInactive(model.id));
        }

        let params = params::resolve(request.max_tokens, request.temperature, &model, &self.defaults);
        let task = NewTask {
            user_id: request.user_id,
            model_config_id: model.id,
            name: request
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            prompt: request.prompt.trim().to_string(),
            max_tokens: Some(params.max_tokens),
            temperature: Some(params.temperature),
        };

        let id = self.tasks.insert(&task).await?;
        if self
            .tasks
            .update_status(id, TaskStatus::Queued, Utc::now(), None)
            .await?
        {
            self.queue.enqueue(id);
            info!(
                task_id = %id,
                user_id = %task.user_id,
                model = %model.identifier,
                max_tokens = params.max_tokens,
                temperature = params.temperature,
                "task queued"
            );
        } else {
            warn!(task_id = %id, "task created but could not be moved to queued");
        }
        Ok(id)
    }

    /// The task and its result, visible to its owner or an administrator.
    pub async fn task_details(
        &self,
        id: TaskId,
        requester: UserId,
        is_admin: bool,
    ) -> Result<Option<TaskDetails>> {
        let Some(task) = self.tasks.get(id).await? else {
            return Ok(None);
        };
        if !is_admin && task.user_id != requester {
            warn!(task_id = %id, requester = %requester, "task details requested by non-owner");
            return Ok(None);
        }
        let result = self.results.for_task(id).await?;
        Ok(Some(TaskDetails { task, result }))
    }

    /// Newest-first page of a user's tasks. Pages start at 1.
    pub async fn user_tasks(&self, user: UserId, page: usize, page_size: usize) -> Result<Vec<Task>> {
        if user.0 <= 0 {
            bail!("a valid user is required");
        }
        self.tasks.for_user(user, page.max(1), page_size.max(1)).await
    }

    pub async fn user_task_count(&self, user: UserId, status: Option<TaskStatus>) -> Result<u64> {
        if user.0 <= 0 {
            return Ok(0);
        }
        self.tasks.count_for_user(user, status).await
    }

    pub async fn user_statistics(&self, user: UserId) -> Result<UserStats> {
        if user.0 <= 0 {
            return Ok(UserStats::default());
        }
        self.results.user_stats(user).await
    }

    pub async fn active_models(&self) -> Result<Vec<ModelConfig>> {
        self.models.active().await
    }

    pub async fn all_models(&self) -> Result<Vec<ModelConfig>> {
        self.models.all().await
    }

    pub async fn model_by_identifier(&self, identifier: &str) -> Result<Option<ModelConfig>> {
        self.models.by_identifier(identifier.trim()).await
    }

    /// Validate and store a new model configuration.
    pub async fn add_model(&self, model: &NewModelConfig) -> Result<ModelConfigId> {
        model.validate()?;
        if self.models.by_identifier(model.identifier.trim()).await?.is_some() {
            bail!("a model with identifier '{}' already exists", model.identifier.trim());
        }
        let mut model = model.clone();
        model.identifier = model.identifier.trim().to_string();
        model.display_name = model.display_name.trim().to_string();
        model.api_key_setting = model.api_key_setting.trim().to_string();
        let id = self.models.insert(&model).await?;
        info!(model_id = %id, identifier = %model.identifier, "model added");
        Ok(id)
    }

    pub async fn set_model_active(&self, id: ModelConfigId, active: bool) -> Result<bool> {
        self.models.set_active(id, active).await
    }

    /// Poll until the task reaches a terminal status or `timeout` passes.
    ///
    /// Returns the last state seen, or `None` if the task does not exist.
    pub async fn wait_until_settled(&self, id: TaskId, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.tasks.get(id).await?;
            let settled = task.as_ref().is_none_or(|task| task.status.is_terminal());
            if settled || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }
}

/// Check the user-supplied parts of a submission without submitting it.
pub fn validate_parameters(
    prompt: &str,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
) -> Result<(), SubmitError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(SubmitError::EmptyPrompt);
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(SubmitError::PromptTooLong(chars));
    }
    if let Some(max_tokens) = max_tokens
        && !(1..=MAX_TOKENS_CEILING).contains(&max_tokens)
    {
        return Err(SubmitError::MaxTokensOutOfRange(max_tokens));
    }
    if let Some(temperature) = temperature
        && !(temperature.is_finite() && (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature))
    {
        return Err(SubmitError::TemperatureOutOfRange(temperature));
    }
    Ok(())
}
