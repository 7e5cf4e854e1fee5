//! The background engine: one queue, one worker task, explicit lifecycle.
//!
//! Producers hand task ids to [`Engine::enqueue`] (or to the shared
//! [`TaskQueue`]); a single tokio task drains the queue and runs each id
//! through a [`TaskProcessor`], one at a time.

pub mod queue;
pub mod worker;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::models::{TaskId, TaskStatus};
use crate::store::TaskStore;
pub use queue::TaskQueue;
pub use worker::{Outcome, TaskProcessor};

const INTERRUPTED: &str = "Processing was interrupted before the task finished";

/// How a call to [`Engine::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// There was no worker to stop.
    NotRunning,
    /// The worker finished its current task and exited.
    Stopped,
    /// The worker did not exit in time and was aborted. The task it was on
    /// may be left in `Processing`.
    Aborted,
}

pub struct Engine {
    queue: Arc<TaskQueue>,
    config: EngineConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            queue: Arc::new(TaskQueue::new()),
            config,
            worker: Mutex::new(None),
        }
    }

    /// The queue producers should enqueue into.
    pub fn queue(&self) -> Arc<TaskQueue> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, id: TaskId) {
        self.queue.enqueue(id);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the worker. Returns `false` if one is already running.
    ///
    /// `init` runs on the worker task itself. If it fails the error is logged
    /// and the worker exits; the caller is not told.
    pub fn start<F>(&self, init: F) -> bool
    where
        F: FnOnce() -> Result<TaskProcessor> + Send + 'static,
    {
        let mut worker = self.worker.lock().unwrap();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("engine is already running");
            return false;
        }

        self.queue.reopen();
        let queue = Arc::clone(&self.queue);
        let config = self.config.clone();
        *worker = Some(tokio::spawn(async move {
            let processor = match init() {
                Ok(processor) => processor,
                Err(e) => {
                    error!(error = %e, "failed to initialize worker");
                    return;
                }
            };
            if config.recover_on_start
                && let Err(e) = recover(processor.tasks().as_ref(), &queue, &config).await
            {
                error!(error = %e, "startup reconciliation failed");
            }
            run(processor, queue, config).await;
        }));
        info!("engine started");
        true
    }

    /// Close the queue and wait up to the configured timeout for the worker.
    ///
    /// Ids still in the queue stay `Queued` in the store and are picked up
    /// by the next start.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.queue.close();
        let Some(mut handle) = self.worker.lock().unwrap().take() else {
            info!("engine is not running");
            return ShutdownOutcome::NotRunning;
        };

        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("engine stopped");
                ShutdownOutcome::Stopped
            }
            Ok(Err(e)) => {
                error!(error = %e, "worker ended abnormally");
                ShutdownOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "worker did not stop in time, aborting"
                );
                handle.abort();
                ShutdownOutcome::Aborted
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.queue.close();
        if let Ok(mut worker) = self.worker.lock()
            && let Some(handle) = worker.take()
        {
            handle.abort();
        }
    }
}

async fn run(processor: TaskProcessor, queue: Arc<TaskQueue>, config: EngineConfig) {
    info!(provider = processor.provider_name(), "worker loop started");
    while !queue.is_closed() {
        let batch = queue.drain().await;
        if queue.is_closed() {
            break;
        }
        for id in batch {
            if queue.is_closed() {
                break;
            }
            let outcome = AssertUnwindSafe(processor.process(id)).catch_unwind().await;
            if let Err(panic) = outcome {
                processor
                    .fail_unexpected(id, &panic_message(panic.as_ref()))
                    .await;
                tokio::time::sleep(config.error_pause).await;
            }
        }
    }
    info!("worker loop ended");
}

/// Fail tasks an earlier run abandoned in `Processing` and re-enqueue the
/// `Queued` ones.
///
/// Only tasks processing for longer than `stale_after` are failed; younger
/// ones may belong to another engine on the same database. Re-enqueued ids
/// that another engine also holds are safe: only one worker wins the
/// `Queued -> Processing` transition.
async fn recover(tasks: &dyn TaskStore, queue: &TaskQueue, config: &EngineConfig) -> Result<()> {
    let limit = config.recovery_limit;
    let cutoff = chrono::Duration::from_std(config.stale_after)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age));
    let stranded = match cutoff {
        Some(cutoff) => tasks.processing_started_before(cutoff, limit).await?,
        None => Vec::new(),
    };
    let mut failed = 0_usize;
    for task in &stranded {
        if tasks
            .update_status(task.id, TaskStatus::Failed, Utc::now(), Some(INTERRUPTED))
            .await?
        {
            failed += 1;
        }
    }
    let waiting = tasks.queued_batch(limit).await?;
    for task in &waiting {
        queue.enqueue(task.id);
    }
    if failed > 0 || !waiting.is_empty() {
        info!(
            failed,
            requeued = waiting.len(),
            "reconciled tasks from a previous run"
        );
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
