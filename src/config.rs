//! Runtime configuration for the engine and the provider client.

use std::time::Duration;

/// Worker lifecycle knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `shutdown` waits for the worker before aborting it.
    pub shutdown_timeout: Duration,
    /// Pause after an unexpected worker-level failure before the loop resumes.
    pub error_pause: Duration,
    /// Reconcile tasks left behind by a previous run when the engine starts.
    pub recover_on_start: bool,
    /// Upper bound on rows the startup reconciliation touches per status.
    pub recovery_limit: usize,
    /// A `Processing` task counts as abandoned only once it has been
    /// processing this long. Must exceed the provider timeout, or a sweep can
    /// fail a task another engine on the same database is still working on.
    pub stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            error_pause: Duration::from_secs(1),
            recover_on_start: true,
            recovery_limit: 1_000,
            stale_after: Duration::from_secs(15 * 60),
        }
    }
}

impl EngineConfig {
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }

    pub fn with_recovery_limit(mut self, limit: usize) -> Self {
        self.recovery_limit = limit;
        self
    }

    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }
}

/// Settings for the HTTP provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            timeout: Duration::from_secs(120),
            user_agent: format!("promptrelay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ProviderConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
