use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use promptrelay::models::{
    ModelConfigId, NewModelConfig, NewTask, Setting, SettingType, TaskId, TaskResult, TaskStatus,
    UserId,
};
use promptrelay::store::sqlite::SqliteStore;
use promptrelay::store::{ModelStore, ResultStore, SettingStore, TaskStore};

struct Fixture {
    _dir: TempDir,
    tasks: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    models: Arc<dyn ModelStore>,
    settings: Arc<dyn SettingStore>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("relay.db")).unwrap());
    Fixture {
        _dir: dir,
        tasks: store.clone(),
        results: store.clone(),
        models: store.clone(),
        settings: store,
    }
}

fn new_model(identifier: &str) -> NewModelConfig {
    NewModelConfig {
        identifier: identifier.to_string(),
        display_name: identifier.to_uppercase(),
        api_key_setting: "OpenAIApiKey_Default_Encrypted".to_string(),
        default_max_tokens: Some(2000),
        default_temperature: None,
        active: true,
        notes: None,
    }
}

fn new_task(user: i64, model: ModelConfigId, prompt: &str) -> NewTask {
    NewTask {
        user_id: UserId(user),
        model_config_id: model,
        name: None,
        prompt: prompt.to_string(),
        max_tokens: None,
        temperature: None,
    }
}

#[tokio::test]
async fn inserted_task_starts_pending() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let id = f.tasks.insert(&new_task(1, model, "hello")).await.unwrap();

    let task = f.tasks.get(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.prompt, "hello");
    assert!(task.queued_at.is_none());
    assert!(task.completed_at.is_none());
}

#[tokio::test]
async fn missing_task_reads_as_none() {
    let f = fixture();
    assert!(f.tasks.get(TaskId(404)).await.unwrap().is_none());
}

#[tokio::test]
async fn full_lifecycle_stamps_monotonic_timestamps() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let id = f.tasks.insert(&new_task(1, model, "hello")).await.unwrap();

    for status in [TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Completed] {
        assert!(f.tasks.update_status(id, status, Utc::now(), None).await.unwrap());
    }

    let task = f.tasks.get(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let queued = task.queued_at.unwrap();
    let started = task.processing_started_at.unwrap();
    let completed = task.completed_at.unwrap();
    assert!(task.created_at <= queued);
    assert!(queued <= started);
    assert!(started <= completed);
    assert!(task.error_message.is_none());
}

#[tokio::test]
async fn timestamps_never_run_backwards() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let id = f.tasks.insert(&new_task(1, model, "hello")).await.unwrap();
    let past = Utc::now() - Duration::hours(1);

    assert!(f.tasks.update_status(id, TaskStatus::Queued, past, None).await.unwrap());
    assert!(f.tasks.update_status(id, TaskStatus::Processing, past, None).await.unwrap());

    let task = f.tasks.get(id).await.unwrap().unwrap();
    assert_eq!(task.queued_at.unwrap(), task.created_at);
    assert_eq!(task.processing_started_at.unwrap(), task.created_at);
}

#[tokio::test]
async fn only_forward_transitions_apply() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let id = f.tasks.insert(&new_task(1, model, "hello")).await.unwrap();
    let now = Utc::now();

    assert!(!f.tasks.update_status(id, TaskStatus::Processing, now, None).await.unwrap());
    assert!(!f.tasks.update_status(id, TaskStatus::Completed, now, None).await.unwrap());
    assert!(!f.tasks.update_status(id, TaskStatus::Pending, now, None).await.unwrap());

    assert!(f.tasks.update_status(id, TaskStatus::Queued, now, None).await.unwrap());
    assert!(!f.tasks.update_status(id, TaskStatus::Queued, now, None).await.unwrap());
    assert!(!f.tasks.update_status(id, TaskStatus::Failed, now, Some("nope")).await.unwrap());

    assert!(f.tasks.update_status(id, TaskStatus::Processing, now, None).await.unwrap());
    assert!(f.tasks.update_status(id, TaskStatus::Failed, now, Some("provider down")).await.unwrap());
    assert!(!f.tasks.update_status(id, TaskStatus::Completed, now, None).await.unwrap());

    let task = f.tasks.get(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("provider down"));
}

#[tokio::test]
async fn transition_on_unknown_id_is_false() {
    let f = fixture();
    assert!(!f.tasks.update_status(TaskId(99), TaskStatus::Queued, Utc::now(), None).await.unwrap());
}

#[tokio::test]
async fn queued_batch_is_oldest_first_and_limited() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let mut ids = Vec::new();
    for n in 0..4 {
        let id = f.tasks.insert(&new_task(1, model, &format!("p{n}"))).await.unwrap();
        ids.push(id);
    }
    // The third stays Pending.
    for id in [ids[0], ids[1], ids[3]] {
        f.tasks.update_status(id, TaskStatus::Queued, Utc::now(), None).await.unwrap();
    }

    let batch: Vec<TaskId> = f.tasks.queued_batch(10).await.unwrap().iter().map(|t| t.id).collect();
    assert_eq!(batch, vec![ids[0], ids[1], ids[3]]);
    assert_eq!(f.tasks.queued_batch(2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn processing_lookup_respects_cutoff_and_status() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let mut ids = Vec::new();
    for n in 0..4 {
        let id = f.tasks.insert(&new_task(1, model, &format!("p{n}"))).await.unwrap();
        f.tasks.update_status(id, TaskStatus::Queued, Utc::now(), None).await.unwrap();
        ids.push(id);
    }
    // Two processing, one left queued, one already failed.
    for id in [ids[0], ids[1], ids[3]] {
        f.tasks.update_status(id, TaskStatus::Processing, Utc::now(), None).await.unwrap();
    }
    f.tasks
        .update_status(ids[3], TaskStatus::Failed, Utc::now(), Some("gone"))
        .await
        .unwrap();

    let later = Utc::now() + Duration::minutes(1);
    let stale: Vec<TaskId> = f
        .tasks
        .processing_started_before(later, 10)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(stale, vec![ids[0], ids[1]]);
    assert_eq!(f.tasks.processing_started_before(later, 1).await.unwrap().len(), 1);

    let earlier = Utc::now() - Duration::minutes(15);
    assert!(f.tasks.processing_started_before(earlier, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn user_listing_pages_newest_first() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(f.tasks.insert(&new_task(7, model, &format!("p{n}"))).await.unwrap());
    }
    f.tasks.insert(&new_task(8, model, "someone else")).await.unwrap();

    let first: Vec<TaskId> = f.tasks.for_user(UserId(7), 1, 2).await.unwrap().iter().map(|t| t.id).collect();
    assert_eq!(first, vec![ids[4], ids[3]]);
    let third: Vec<TaskId> = f.tasks.for_user(UserId(7), 3, 2).await.unwrap().iter().map(|t| t.id).collect();
    assert_eq!(third, vec![ids[0]]);

    assert_eq!(f.tasks.count_for_user(UserId(7), None).await.unwrap(), 5);
    assert_eq!(f.tasks.count_for_user(UserId(7), Some(TaskStatus::Queued)).await.unwrap(), 0);
    assert_eq!(f.tasks.count_for_user(UserId(7), Some(TaskStatus::Pending)).await.unwrap(), 5);
}

#[tokio::test]
async fn task_requires_an_existing_model() {
    let f = fixture();
    assert!(f.tasks.insert(&new_task(1, ModelConfigId(42), "orphan")).await.is_err());
}

#[tokio::test]
async fn one_result_per_task_and_user_stats() {
    let f = fixture();
    let model = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    let ok = f.tasks.insert(&new_task(3, model, "a")).await.unwrap();
    let bad = f.tasks.insert(&new_task(3, model, "b")).await.unwrap();
    f.tasks.insert(&new_task(3, model, "c")).await.unwrap();

    let result = |task_id: TaskId, success: bool, total: Option<u32>| TaskResult {
        task_id,
        content: if success { "answer".to_string() } else { String::new() },
        prompt_tokens: total.map(|_| 10),
        completion_tokens: total.map(|_| 5),
        total_tokens: total,
        processing_ms: 12,
        model_used: "gpt-4o-mini".to_string(),
        success,
        created_at: Utc::now(),
    };
    f.results.insert(&result(ok, true, Some(15))).await.unwrap();
    f.results.insert(&result(bad, false, None)).await.unwrap();
    assert!(f.results.insert(&result(ok, true, Some(15))).await.is_err());

    let stored = f.results.for_task(ok).await.unwrap().unwrap();
    assert_eq!(stored.content, "answer");
    assert_eq!(stored.total_tokens, Some(15));
    assert!(stored.success);
    assert!(f.results.for_task(TaskId(999)).await.unwrap().is_none());

    let stats = f.results.user_stats(UserId(3)).await.unwrap();
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.successful_tasks, 1);
    assert_eq!(stats.total_tokens, 15);

    assert_eq!(f.results.user_stats(UserId(4)).await.unwrap().total_tasks, 0);
}

#[tokio::test]
async fn models_are_unique_ignoring_case() {
    let f = fixture();
    let id = f.models.insert(&new_model("gpt-4o-mini")).await.unwrap();
    assert!(f.models.insert(&new_model("GPT-4O-MINI")).await.is_err());

    let found = f.models.by_identifier("GPT-4o-Mini").await.unwrap().unwrap();
    assert_eq!(found.id, id);
    assert_eq!(found.default_max_tokens, Some(2000));
    assert!(f.models.by_identifier("claude").await.unwrap().is_none());
}

#[tokio::test]
async fn deactivated_models_drop_out_of_the_active_list() {
    let f = fixture();
    let a = f.models.insert(&new_model("a-model")).await.unwrap();
    f.models.insert(&new_model("b-model")).await.unwrap();

    assert!(f.models.set_active(a, false).await.unwrap());
    assert!(!f.models.set_active(ModelConfigId(77), false).await.unwrap());

    assert_eq!(f.models.active().await.unwrap().len(), 1);
    assert_eq!(f.models.all().await.unwrap().len(), 2);
    assert!(!f.models.get(a).await.unwrap().unwrap().active);
}

#[test]
fn settings_upsert_by_key_ignoring_case() {
    let f = fixture();
    let mut setting = Setting {
        key: "DefaultAITaskMaxTokens".to_string(),
        value: Some("1000".to_string()),
        description: None,
        data_type: SettingType::Integer,
        sensitive: false,
        group: Some("AI".to_string()),
    };
    f.settings.upsert(&setting).unwrap();

    setting.key = "defaultaitaskmaxtokens".to_string();
    setting.value = Some("1500".to_string());
    f.settings.upsert(&setting).unwrap();

    let all = f.settings.all().unwrap();
    assert_eq!(all.len(), 1);
    let stored = f.settings.get("DEFAULTAITASKMAXTOKENS").unwrap().unwrap();
    assert_eq!(stored.value.as_deref(), Some("1500"));
    assert_eq!(stored.data_type, SettingType::Integer);
    assert!(f.settings.get("Missing").unwrap().is_none());
}

#[test]
fn reopening_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("relay.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        let settings: &dyn SettingStore = &store;
        settings
            .upsert(&Setting {
                key: "UseMockAIService".to_string(),
                value: Some("true".to_string()),
                description: None,
                data_type: SettingType::Boolean,
                sensitive: false,
                group: None,
            })
            .unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    let settings: &dyn SettingStore = &store;
    assert!(settings.get("UseMockAIService").unwrap().is_some());
}
