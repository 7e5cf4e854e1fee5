//! Domain records shared by the stores, the service, and the worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TaskId(pub i64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ModelConfigId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for ModelConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a task: `Pending → Queued → Processing → {Completed | Failed}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// The exact string persisted in the store.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Queued => "Queued",
            TaskStatus::Processing => "Processing",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// The only status a task may be in when moving to `self`.
    pub fn predecessor(self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Pending => None,
            TaskStatus::Queued => Some(TaskStatus::Pending),
            TaskStatus::Processing => Some(TaskStatus::Queued),
            TaskStatus::Completed | TaskStatus::Failed => Some(TaskStatus::Processing),
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.predecessor() == Some(self)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown task status: {s}"))
    }
}

/// A persisted task.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub model_config_id: ModelConfigId,
    pub name: Option<String>,
    pub prompt: String,
    pub status: TaskStatus,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Fields supplied when inserting a task. Inserted tasks start as `Pending`.
#[derive(Clone, Debug, PartialEq)]
pub struct NewTask {
    pub user_id: UserId,
    pub model_config_id: ModelConfigId,
    pub name: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Outcome record for one processing attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub content: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub processing_ms: i64,
    pub model_used: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelConfig {
    pub id: ModelConfigId,
    /// Provider-side model name, e.g. `gpt-4o-mini`.
    pub identifier: String,
    pub display_name: String,
    /// Setting key that holds the (encrypted) API key for this model.
    pub api_key_setting: String,
    pub default_max_tokens: Option<u32>,
    pub default_temperature: Option<f64>,
    pub active: bool,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewModelConfig {
    pub identifier: String,
    pub display_name: String,
    pub api_key_setting: String,
    pub default_max_tokens: Option<u32>,
    pub default_temperature: Option<f64>,
    pub active: bool,
    pub notes: Option<String>,
}

impl NewModelConfig {
    /// Check required fields and default ranges before the record is stored.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identifier.trim().is_empty() {
            anyhow::bail!("model identifier is required");
        }
        if self.display_name.trim().is_empty() {
            anyhow::bail!("display name is required");
        }
        if self.api_key_setting.trim().is_empty() {
            anyhow::bail!("API key setting name is required");
        }
        if let Some(max_tokens) = self.default_max_tokens
            && !(1..=crate::consts::MAX_TOKENS_CEILING).contains(&max_tokens)
        {
            anyhow::bail!(
                "default max tokens must be between 1 and {}",
                crate::consts::MAX_TOKENS_CEILING
            );
        }
        if let Some(temperature) = self.default_temperature
            && !(temperature.is_finite()
                && (crate::consts::MIN_TEMPERATURE..=crate::consts::MAX_TEMPERATURE)
                    .contains(&temperature))
        {
            anyhow::bail!("default temperature must be between 0.0 and 2.0");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SettingType {
    String,
    Integer,
    Real,
    Boolean,
    EncryptedString,
}

impl SettingType {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingType::String => "String",
            SettingType::Integer => "Integer",
            SettingType::Real => "Real",
            SettingType::Boolean => "Boolean",
            SettingType::EncryptedString => "EncryptedString",
        }
    }
}

impl FromStr for SettingType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            SettingType::String,
            SettingType::Integer,
            SettingType::Real,
            SettingType::Boolean,
            SettingType::EncryptedString,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| anyhow::anyhow!("unknown setting type: {s}"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
    pub description: Option<String>,
    pub data_type: SettingType,
    pub sensitive: bool,
    pub group: Option<String>,
}

impl Setting {
    pub fn is_encrypted(&self) -> bool {
        self.sensitive && self.data_type == SettingType::EncryptedString
    }
}

/// Per-user usage totals.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UserStats {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub total_tokens: u64,
}
