/// DDL applied when a database is opened. Every statement is idempotent.
///
/// Timestamps are stored as fixed-width RFC 3339 UTC text with microsecond
/// precision, so text comparison orders them chronologically.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    key         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    value       TEXT,
    description TEXT,
    data_type   TEXT NOT NULL,
    sensitive   INTEGER NOT NULL DEFAULT 0,
    group_name  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT
);

CREATE TABLE IF NOT EXISTS model_configs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier          TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name        TEXT NOT NULL,
    api_key_setting     TEXT NOT NULL,
    default_max_tokens  INTEGER,
    default_temperature REAL,
    active              INTEGER NOT NULL DEFAULT 1,
    notes               TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT
);

CREATE TABLE IF NOT EXISTS tasks (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id               INTEGER NOT NULL,
    model_config_id       INTEGER NOT NULL
        REFERENCES model_configs(id) ON DELETE RESTRICT,
    name                  TEXT,
    prompt                TEXT NOT NULL,
    status                TEXT NOT NULL,
    max_tokens            INTEGER,
    temperature           REAL,
    created_at            TEXT NOT NULL,
    queued_at             TEXT,
    processing_started_at TEXT,
    completed_at          TEXT,
    error_message         TEXT
);

CREATE TABLE IF NOT EXISTS task_results (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id           INTEGER NOT NULL UNIQUE
        REFERENCES tasks(id) ON DELETE CASCADE,
    content           TEXT,
    prompt_tokens     INTEGER,
    completion_tokens INTEGER,
    total_tokens      INTEGER,
    processing_ms     INTEGER,
    model_used        TEXT,
    success           INTEGER NOT NULL,
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks (user_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
"#;
