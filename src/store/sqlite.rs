use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema::SCHEMA;
use super::{ModelStore, ResultStore, SettingStore, TaskStore};
use crate::models::{
    ModelConfig, ModelConfigId, NewModelConfig, NewTask, Setting, Task, TaskId, TaskResult,
    TaskStatus, UserId, UserStats,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str = "id, user_id, model_config_id, name, prompt, status, max_tokens, \
     temperature, created_at, queued_at, processing_started_at, completed_at, error_message";

const RESULT_COLUMNS: &str = "task_id, content, prompt_tokens, completion_tokens, total_tokens, \
     processing_ms, model_used, success, created_at";

const MODEL_COLUMNS: &str = "id, identifier, display_name, api_key_setting, default_max_tokens, \
     default_temperature, active, notes";

const SETTING_COLUMNS: &str = "key, value, description, data_type, sensitive, group_name";

/// SQLite-backed implementation of every store contract.
///
/// Holds only the database path: each call opens its own short-lived
/// connection, so every read and every status transition is an independent
/// atomic unit. That also means `":memory:"` is not supported; tests use a
/// file in a temp directory.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str() == ":memory:" {
            bail!("in-memory databases are not supported: every call opens a new connection");
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let store = Self { path };
        let conn = store.connect()?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .context("failed to enable WAL journal")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create schema")?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open database {}", self.path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.connect()?;
        f(&conn).with_context(|| format!("{operation} failed"))
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: &NewTask) -> Result<TaskId> {
        let created_at = encode_time(Utc::now());
        self.with_connection("insert task", |conn| {
            conn.execute(
                "INSERT INTO tasks (
                    user_id, model_config_id, name, prompt, status,
                    max_tokens, temperature, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    task.user_id.0,
                    task.model_config_id.0,
                    task.name,
                    task.prompt,
                    TaskStatus::Pending.as_str(),
                    task.max_tokens,
                    task.temperature,
                    created_at,
                ],
            )?;
            Ok(TaskId(conn.last_insert_rowid()))
        })
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        self.with_connection("get task", |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id.0],
                task_from_row,
            )
            .optional()
        })
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool> {
        let (Some(from), Some((column, floor))) =
            (status.predecessor(), transition_columns(status))
        else {
            return Ok(false);
        };

        // MAX() keeps each timestamp at or after the one before it even if
        // the wall clock steps backwards between transitions.
        let sql = format!(
            "UPDATE tasks
                SET status = ?1,
                    {column} = MAX(?2, {floor}),
                    error_message = COALESCE(?3, error_message)
              WHERE id = ?4 AND status = ?5"
        );
        let changed = self.with_connection("update task status", |conn| {
            conn.execute(
                &sql,
                params![status.as_str(), encode_time(at), error, id.0, from.as_str()],
            )
        })?;
        Ok(changed == 1)
    }

    async fn with_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>> {
        self.with_connection("list tasks by status", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                  WHERE status = ?1
                  ORDER BY created_at ASC, id ASC
                  LIMIT ?2"
            ))?;
            let tasks = stmt
                .query_map(params![status.as_str(), limit as i64], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    async fn processing_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        self.with_connection("list stale processing tasks", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                  WHERE status = ?1 AND processing_started_at < ?2
                  ORDER BY processing_started_at ASC, id ASC
                  LIMIT ?3"
            ))?;
            let tasks = stmt
                .query_map(
                    params![
                        TaskStatus::Processing.as_str(),
                        encode_time(cutoff),
                        limit as i64
                    ],
                    task_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    async fn for_user(&self, user: UserId, page: usize, page_size: usize) -> Result<Vec<Task>> {
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
        self.with_connection("list user tasks", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                  WHERE user_id = ?1
                  ORDER BY created_at DESC, id DESC
                  LIMIT ?2 OFFSET ?3"
            ))?;
            let tasks = stmt
                .query_map(
                    params![user.0, page_size as i64, offset as i64],
                    task_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    async fn count_for_user(&self, user: UserId, status: Option<TaskStatus>) -> Result<u64> {
        let count = self.with_connection("count user tasks", |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM tasks
                  WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
                params![user.0, status.map(TaskStatus::as_str)],
                |row| row.get::<_, i64>(0),
            )
        })?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert(&self, result: &TaskResult) -> Result<()> {
        self.with_connection("insert task result", |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO task_results ({RESULT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    result.task_id.0,
                    result.content,
                    result.prompt_tokens,
                    result.completion_tokens,
                    result.total_tokens,
                    result.processing_ms,
                    result.model_used,
                    result.success,
                    encode_time(result.created_at),
                ],
            )?;
            Ok(())
        })
    }

    async fn for_task(&self, id: TaskId) -> Result<Option<TaskResult>> {
        self.with_connection("get task result", |conn| {
            conn.query_row(
                &format!("SELECT {RESULT_COLUMNS} FROM task_results WHERE task_id = ?1"),
                [id.0],
                result_from_row,
            )
            .optional()
        })
    }

    async fn user_stats(&self, user: UserId) -> Result<UserStats> {
        self.with_connection("user statistics", |conn| {
            conn.query_row(
                "SELECT COUNT(t.id),
                        COALESCE(SUM(CASE WHEN r.success = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(COALESCE(r.total_tokens, 0)), 0)
                   FROM tasks t
                   LEFT JOIN task_results r ON r.task_id = t.id
                  WHERE t.user_id = ?1",
                [user.0],
                |row| {
                    Ok(UserStats {
                        total_tasks: row.get::<_, i64>(0)?.max(0) as u64,
                        successful_tasks: row.get::<_, i64>(1)?.max(0) as u64,
                        total_tokens: row.get::<_, i64>(2)?.max(0) as u64,
                    })
                },
            )
        })
    }
}

#[async_trait]
impl ModelStore for SqliteStore {
    async fn get(&self, id: ModelConfigId) -> Result<Option<ModelConfig>> {
        self.with_connection("get model", |conn| {
            conn.query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM model_configs WHERE id = ?1"),
                [id.0],
                model_from_row,
            )
            .optional()
        })
    }

    async fn by_identifier(&self, identifier: &str) -> Result<Option<ModelConfig>> {
        self.with_connection("get model by identifier", |conn| {
            conn.query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM model_configs WHERE identifier = ?1"),
                [identifier],
                model_from_row,
            )
            .optional()
        })
    }

    async fn all(&self) -> Result<Vec<ModelConfig>> {
        self.with_connection("list models", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MODEL_COLUMNS} FROM model_configs ORDER BY display_name, id"
            ))?;
            let models = stmt
                .query_map([], model_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(models)
        })
    }

    async fn active(&self) -> Result<Vec<ModelConfig>> {
        self.with_connection("list active models", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MODEL_COLUMNS} FROM model_configs
                  WHERE active = 1
                  ORDER BY display_name, id"
            ))?;
            let models = stmt
                .query_map([], model_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(models)
        })
    }

    async fn insert(&self, model: &NewModelConfig) -> Result<ModelConfigId> {
        let created_at = encode_time(Utc::now());
        self.with_connection("insert model", |conn| {
            conn.execute(
                "INSERT INTO model_configs (
                    identifier, display_name, api_key_setting, default_max_tokens,
                    default_temperature, active, notes, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    model.identifier,
                    model.display_name,
                    model.api_key_setting,
                    model.default_max_tokens,
                    model.default_temperature,
                    model.active,
                    model.notes,
                    created_at,
                ],
            )?;
            Ok(ModelConfigId(conn.last_insert_rowid()))
        })
    }

    async fn set_active(&self, id: ModelConfigId, active: bool) -> Result<bool> {
        let updated_at = encode_time(Utc::now());
        let changed = self.with_connection("set model active", |conn| {
            conn.execute(
                "UPDATE model_configs SET active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active, updated_at, id.0],
            )
        })?;
        Ok(changed == 1)
    }
}

impl SettingStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Setting>> {
        self.with_connection("get setting", |conn| {
            conn.query_row(
                &format!("SELECT {SETTING_COLUMNS} FROM settings WHERE key = ?1"),
                [key],
                setting_from_row,
            )
            .optional()
        })
    }

    fn all(&self) -> Result<Vec<Setting>> {
        self.with_connection("list settings", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SETTING_COLUMNS} FROM settings ORDER BY group_name, key"
            ))?;
            let settings = stmt
                .query_map([], setting_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(settings)
        })
    }

    fn upsert(&self, setting: &Setting) -> Result<()> {
        let now = encode_time(Utc::now());
        self.with_connection("save setting", |conn| {
            conn.execute(
                "INSERT INTO settings (
                    key, value, description, data_type, sensitive, group_name, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    description = excluded.description,
                    data_type = excluded.data_type,
                    sensitive = excluded.sensitive,
                    group_name = excluded.group_name,
                    updated_at = excluded.created_at",
                params![
                    setting.key,
                    setting.value,
                    setting.description,
                    setting.data_type.as_str(),
                    setting.sensitive,
                    setting.group,
                    now,
                ],
            )?;
            Ok(())
        })
    }
}

/// Timestamp column a status owns, plus the expression it must not precede.
fn transition_columns(status: TaskStatus) -> Option<(&'static str, &'static str)> {
    match status {
        TaskStatus::Pending => None,
        TaskStatus::Queued => Some(("queued_at", "created_at")),
        TaskStatus::Processing => Some(("processing_started_at", "COALESCE(queued_at, created_at)")),
        TaskStatus::Completed | TaskStatus::Failed => Some((
            "completed_at",
            "COALESCE(processing_started_at, queued_at, created_at)",
        )),
    }
}

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    decode_time(idx, &raw)
}

fn optional_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| decode_time(idx, &raw)).transpose()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(5)?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;
    Ok(Task {
        id: TaskId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        model_config_id: ModelConfigId(row.get(2)?),
        name: row.get(3)?,
        prompt: row.get(4)?,
        status,
        max_tokens: row.get(6)?,
        temperature: row.get(7)?,
        created_at: time_at(row, 8)?,
        queued_at: optional_time_at(row, 9)?,
        processing_started_at: optional_time_at(row, 10)?,
        completed_at: optional_time_at(row, 11)?,
        error_message: row.get(12)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<TaskResult> {
    Ok(TaskResult {
        task_id: TaskId(row.get(0)?),
        content: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        prompt_tokens: row.get(2)?,
        completion_tokens: row.get(3)?,
        total_tokens: row.get(4)?,
        processing_ms: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
        model_used: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        success: row.get(7)?,
        created_at: time_at(row, 8)?,
    })
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelConfig> {
    Ok(ModelConfig {
        id: ModelConfigId(row.get(0)?),
        identifier: row.get(1)?,
        display_name: row.get(2)?,
        api_key_setting: row.get(3)?,
        default_max_tokens: row.get(4)?,
        default_temperature: row.get(5)?,
        active: row.get(6)?,
        notes: row.get(7)?,
    })
}

fn setting_from_row(row: &Row<'_>) -> rusqlite::Result<Setting> {
    let data_type: String = row.get(3)?;
    let data_type = data_type
        .parse()
        .map_err(|e: anyhow::Error| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    Ok(Setting {
        key: row.get(0)?,
        value: row.get(1)?,
        description: row.get(2)?,
        data_type,
        sensitive: row.get(4)?,
        group: row.get(5)?,
    })
}
