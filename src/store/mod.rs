//! Persistence contracts consumed by the engine and the submission service.
//!
//! Each trait is deliberately small. [`sqlite::SqliteStore`] implements all of
//! them over one database file; tests swap in their own implementations where
//! they need a store that misbehaves.

pub mod schema;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ModelConfig, ModelConfigId, NewModelConfig, NewTask, Setting, Task, TaskId, TaskResult,
    TaskStatus, UserId, UserStats,
};

/// Task records and their status transitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task in `Pending` and return its id.
    async fn insert(&self, task: &NewTask) -> Result<TaskId>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// Move a task to `status` and stamp the timestamp that status owns.
    ///
    /// Returns `false` (and changes nothing) when the task does not exist or
    /// is not currently in the one status allowed to precede `status`.
    /// `error` is recorded when present.
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool>;

    /// Oldest-first tasks in the given status.
    async fn with_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>>;

    /// Oldest-first `Processing` tasks whose processing began before `cutoff`.
    async fn processing_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>>;

    /// Oldest-first tasks waiting in `Queued`.
    async fn queued_batch(&self, limit: usize) -> Result<Vec<Task>> {
        self.with_status(TaskStatus::Queued, limit).await
    }

    /// Newest-first page of a user's tasks. Pages are 1-based.
    async fn for_user(&self, user: UserId, page: usize, page_size: usize) -> Result<Vec<Task>>;

    async fn count_for_user(&self, user: UserId, status: Option<TaskStatus>) -> Result<u64>;
}

/// Append-only task results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert(&self, result: &TaskResult) -> Result<()>;
    async fn for_task(&self, id: TaskId) -> Result<Option<TaskResult>>;
    async fn user_stats(&self, user: UserId) -> Result<UserStats>;
}

/// Model configurations. Written by administrators, read by everyone else.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get(&self, id: ModelConfigId) -> Result<Option<ModelConfig>>;
    async fn by_identifier(&self, identifier: &str) -> Result<Option<ModelConfig>>;
    async fn all(&self) -> Result<Vec<ModelConfig>>;
    async fn active(&self) -> Result<Vec<ModelConfig>>;
    async fn insert(&self, model: &NewModelConfig) -> Result<ModelConfigId>;
    async fn set_active(&self, id: ModelConfigId, active: bool) -> Result<bool>;
}

/// Raw settings rows. Values come back exactly as stored (ciphertext stays
/// ciphertext); see [`crate::settings::SettingsService`] for typed access.
pub trait SettingStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Setting>>;
    fn all(&self) -> Result<Vec<Setting>>;
    fn upsert(&self, setting: &Setting) -> Result<()>;
}
