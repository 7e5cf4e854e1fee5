use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use promptrelay::banner::{BannerInfo, print_banner, print_session_summary};
use promptrelay::config::{EngineConfig, ProviderConfig};
use promptrelay::consts::{SETTING_DEFAULT_API_KEY, SETTING_DEFAULT_MODEL, SETTING_USE_MOCK, default_db_path};
use promptrelay::engine::worker::is_placeholder_key;
use promptrelay::engine::{Engine, ShutdownOutcome, TaskProcessor};
use promptrelay::models::{ModelConfig, NewModelConfig, TaskId, TaskStatus, UserId};
use promptrelay::params::ParameterDefaults;
use promptrelay::provider::Provider;
use promptrelay::provider::mock::MockProvider;
use promptrelay::provider::openai::OpenAiProvider;
use promptrelay::service::{SubmitRequest, TaskDetails, TaskService};
use promptrelay::settings::SettingsService;
use promptrelay::settings::secret::{AesCipher, SecretResolver};
use promptrelay::store::sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Mock,
    Openai,
}

#[derive(Parser)]
#[command(
    name = "promptrelay",
    version,
    about = "Queue prompts and relay them to a text-generation API."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Provider to call (overrides the UseMockAIService setting)
    #[arg(short, long, value_enum)]
    provider: Option<ProviderKind>,

    /// SQLite database path (default: ~/.promptrelay/relay.db)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// User id tasks are submitted and listed as
    #[arg(short, long, default_value_t = 1)]
    user: i64,

    /// Model identifier to submit against (default: DefaultAIModelIdentifier setting)
    #[arg(short, long)]
    model: Option<String>,

    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Seconds to wait for the worker on exit before aborting it
    #[arg(long, default_value_t = 10)]
    shutdown_timeout: u64,

    /// Seconds to wait for a submitted task to finish
    #[arg(long, default_value_t = 180)]
    wait: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Submit one prompt, wait for it, and print the result
    Run {
        prompt: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f64>,
    },
    /// Show a task and its result
    Show { id: i64 },
    /// List your tasks, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
    /// Usage totals for the current user
    Stats,
    /// List model configurations
    Models {
        /// Include inactive models
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Register a model configuration
    AddModel {
        identifier: String,
        #[arg(long)]
        name: Option<String>,
        /// Setting that holds the API key for this model
        #[arg(long, default_value = SETTING_DEFAULT_API_KEY)]
        key_setting: String,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long, default_value_t = false)]
        inactive: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Store an API key (encrypted). Reads stdin when no key is given.
    SetKey {
        key: Option<String>,
        #[arg(long, default_value = SETTING_DEFAULT_API_KEY)]
        setting: String,
    },
    /// List settings (sensitive values masked)
    Settings,
}

struct App {
    store: Arc<SqliteStore>,
    settings: Arc<SettingsService>,
    service: TaskService,
    engine: Engine,
    db_path: PathBuf,
    user: UserId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let cipher = Arc::new(AesCipher::from_env()?);
    let settings = Arc::new(SettingsService::new(store.clone(), cipher));
    settings.seed_defaults()?;

    let engine = Engine::new(
        EngineConfig::default().with_shutdown_timeout(Duration::from_secs(cli.shutdown_timeout)),
    );
    let defaults = ParameterDefaults::from_settings(&settings);
    let service = TaskService::new(store.clone(), store.clone(), store.clone(), engine.queue())
        .with_defaults(defaults);
    ensure_default_model(&service, &settings).await?;

    let app = App {
        store,
        settings,
        service,
        engine,
        db_path,
        user: UserId(cli.user),
    };

    match cli.command {
        Some(Command::Show { id }) => show(&app, TaskId(id)).await,
        Some(Command::List { page, page_size }) => list(&app, page, page_size).await,
        Some(Command::Stats) => {
            let stats = app.service.user_statistics(app.user).await?;
            println!("tasks       {}", stats.total_tasks);
            println!("succeeded   {}", stats.successful_tasks);
            println!("tokens      {}", stats.total_tokens);
            Ok(())
        }
        Some(Command::Models { all }) => {
            let models = if all {
                app.service.all_models().await?
            } else {
                app.service.active_models().await?
            };
            for model in models {
                print_model(&model);
            }
            Ok(())
        }
        Some(Command::AddModel {
            identifier,
            name,
            key_setting,
            max_tokens,
            temperature,
            inactive,
            notes,
        }) => {
            let id = app
                .service
                .add_model(&NewModelConfig {
                    display_name: name.unwrap_or_else(|| identifier.clone()),
                    identifier,
                    api_key_setting: key_setting,
                    default_max_tokens: max_tokens,
                    default_temperature: temperature,
                    active: !inactive,
                    notes,
                })
                .await?;
            println!("added model {id}");
            Ok(())
        }
        Some(Command::SetKey { key, setting }) => {
            let key = match key {
                Some(key) => key,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let key = key.trim();
            if key.is_empty() {
                bail!("no API key provided");
            }
            app.settings
                .set_secret(&setting, key, Some("API key for the text-generation provider"))?;
            println!("saved {setting}");
            Ok(())
        }
        Some(Command::Settings) => {
            for setting in app.settings.all()? {
                println!(
                    "{:<34} {:<16} {}",
                    setting.key,
                    setting.data_type.as_str(),
                    setting.value.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Some(Command::Run {
            prompt,
            name,
            max_tokens,
            temperature,
        }) => {
            let model = resolve_model(&app, cli.model.as_deref()).await?;
            start_engine(&app, &model, cli.provider)?;
            let mut request = SubmitRequest::new(app.user, model.id, prompt);
            request.name = name;
            request.max_tokens = max_tokens;
            request.temperature = temperature;
            let outcome = submit_and_wait(&app, request, Duration::from_secs(cli.wait)).await;
            stop_engine(&app).await;
            outcome
        }
        None => {
            let model = resolve_model(&app, cli.model.as_deref()).await?;
            let provider = start_engine(&app, &model, cli.provider)?;
            print_banner(&BannerInfo {
                provider,
                model: &model.identifier,
                key_status: &key_status(&app.settings, &model),
                database: &app.db_path,
                user: app.user.0,
            });
            repl(&app, &model, Duration::from_secs(cli.wait)).await?;
            stop_engine(&app).await;
            print_session_summary(app.service.user_statistics(app.user).await?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// A fresh database has settings but no models; register the default one.
async fn ensure_default_model(service: &TaskService, settings: &SettingsService) -> anyhow::Result<()> {
    if !service.all_models().await?.is_empty() {
        return Ok(());
    }
    let identifier = settings
        .get_value(SETTING_DEFAULT_MODEL)?
        .unwrap_or_else(|| "gpt-3.5-turbo".to_string());
    service
        .add_model(&NewModelConfig {
            display_name: identifier.clone(),
            identifier,
            api_key_setting: SETTING_DEFAULT_API_KEY.to_string(),
            default_max_tokens: None,
            default_temperature: None,
            active: true,
            notes: Some("Registered on first run".to_string()),
        })
        .await?;
    Ok(())
}

async fn resolve_model(app: &App, requested: Option<&str>) -> anyhow::Result<ModelConfig> {
    let identifier = match requested {
        Some(identifier) => identifier.to_string(),
        None => app
            .settings
            .get_value(SETTING_DEFAULT_MODEL)?
            .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
    };
    match app.service.model_by_identifier(&identifier).await? {
        Some(model) => Ok(model),
        None => bail!("unknown model '{identifier}', see `promptrelay models --all`"),
    }
}

/// Pick the provider and spawn the worker. Returns the provider label.
fn start_engine(
    app: &App,
    model: &ModelConfig,
    requested: Option<ProviderKind>,
) -> anyhow::Result<&'static str> {
    let kind = requested.unwrap_or_else(|| {
        if app.settings.get_bool(SETTING_USE_MOCK, true) {
            ProviderKind::Mock
        } else {
            ProviderKind::Openai
        }
    });

    let (provider, label) = match kind {
        ProviderKind::Mock => (Arc::new(MockProvider::new()) as Arc<dyn Provider>, "mock"),
        ProviderKind::Openai => (
            Arc::new(OpenAiProvider::new(&ProviderConfig::default())?) as Arc<dyn Provider>,
            "openai",
        ),
    };
    // The key check runs for every provider, the mock included.
    let secrets = app.settings.clone() as Arc<dyn SecretResolver>;
    if key_status(&app.settings, model) != "configured" {
        eprintln!(
            "warning: no API key configured in {}, tasks for {} will fail until you run `promptrelay set-key`",
            model.api_key_setting, model.identifier
        );
    }

    let store = app.store.clone();
    let defaults = ParameterDefaults::from_settings(&app.settings);
    app.engine.start(move || {
        Ok(TaskProcessor::new(
            store.clone(),
            store.clone(),
            store,
            secrets,
            provider,
            defaults,
        ))
    });
    Ok(label)
}

async fn stop_engine(app: &App) {
    if app.engine.shutdown().await == ShutdownOutcome::Aborted {
        eprintln!("warning: worker was aborted, a task may be left processing");
    }
}

fn key_status(settings: &SettingsService, model: &ModelConfig) -> String {
    match settings.resolve_secret(&model.api_key_setting) {
        Some(key) if !is_placeholder_key(&key) => "configured".to_string(),
        Some(_) => "placeholder".to_string(),
        None => "missing".to_string(),
    }
}

async fn submit_and_wait(app: &App, request: SubmitRequest, wait: Duration) -> anyhow::Result<()> {
    let id = app.service.submit(request).await?;
    println!("queued task {id}");
    let task = app
        .service
        .wait_until_settled(id, wait)
        .await?
        .with_context(|| format!("task {id} disappeared"))?;
    if !task.status.is_terminal() {
        println!("task {id} is still {} after {}s", task.status, wait.as_secs());
        return Ok(());
    }
    show(app, id).await
}

async fn repl(app: &App, model: &ModelConfig, wait: Duration) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("\nrelay> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            result = lines.next_line() => {
                match result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        println!();
                        break;
                    }
                    Err(e) => {
                        eprintln!("input error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "quit" || prompt == "exit" {
            break;
        }

        let request = SubmitRequest::new(app.user, model.id, prompt);
        tokio::select! {
            result = submit_and_wait(app, request, wait) => {
                if let Err(e) = result {
                    eprintln!("\nerror: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nstopped waiting, the task keeps running in the background");
            }
        }
    }
    Ok(())
}

async fn show(app: &App, id: TaskId) -> anyhow::Result<()> {
    match app.service.task_details(id, app.user, false).await? {
        Some(details) => {
            print_details(&details);
            Ok(())
        }
        None => bail!("task {id} not found"),
    }
}

async fn list(app: &App, page: usize, page_size: usize) -> anyhow::Result<()> {
    let total = app.service.user_task_count(app.user, None).await?;
    let tasks = app.service.user_tasks(app.user, page, page_size).await?;
    for task in &tasks {
        println!(
            "{:>6}  {:<10}  {}  {}",
            task.id,
            task.status,
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            task.name.as_deref().unwrap_or(&preview(&task.prompt)),
        );
    }
    let failed = app
        .service
        .user_task_count(app.user, Some(TaskStatus::Failed))
        .await?;
    println!("{} shown, {total} total, {failed} failed", tasks.len());
    Ok(())
}

fn print_details(details: &TaskDetails) {
    let task = &details.task;
    println!("task      {}", task.id);
    println!("status    {}", task.status);
    if let Some(name) = &task.name {
        println!("name      {name}");
    }
    println!("prompt    {}", preview(&task.prompt));
    if let Some(error) = &task.error_message {
        println!("error     {error}");
    }
    if let Some(result) = &details.result {
        println!("model     {}", result.model_used);
        println!("elapsed   {} ms", result.processing_ms);
        if let Some(total) = result.total_tokens {
            println!(
                "tokens    {} prompt + {} completion = {total}",
                result.prompt_tokens.unwrap_or(0),
                result.completion_tokens.unwrap_or(0),
            );
        }
        if result.success {
            println!("\n=> {}", result.content);
        }
    }
}

fn print_model(model: &ModelConfig) {
    println!(
        "{:>4}  {:<24} {:<24} {}{}",
        model.id,
        model.identifier,
        model.display_name,
        model.api_key_setting,
        if model.active { "" } else { "  (inactive)" },
    );
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    match line.char_indices().nth(60) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}
