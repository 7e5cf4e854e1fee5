use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::warn;

use crate::models::TaskId;

/// In-memory FIFO of task ids with a counting wake signal.
///
/// Producers call [`enqueue`](Self::enqueue) from anywhere without blocking.
/// The single consumer awaits [`drain`](Self::drain), which takes everything
/// available in one batch.
pub struct TaskQueue {
    ids: Mutex<VecDeque<TaskId>>,
    signal: Semaphore,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            ids: Mutex::new(VecDeque::new()),
            signal: Semaphore::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an id and wake the consumer. Ignored once the queue is closed.
    pub fn enqueue(&self, id: TaskId) {
        if self.is_closed() {
            warn!(task_id = %id, "queue is closed, task stays queued in the store");
            return;
        }
        self.ids.lock().unwrap().push_back(id);
        self.signal.add_permits(1);
    }

    /// Wait for at least one wake-up, then take every id currently queued.
    ///
    /// May return an empty batch: after [`close`](Self::close), or when an
    /// earlier drain already took the ids this wake-up was for.
    pub async fn drain(&self) -> Vec<TaskId> {
        if let Ok(permit) = self.signal.acquire().await {
            permit.forget();
        }
        let batch: Vec<TaskId> = self.ids.lock().unwrap().drain(..).collect();
        // One permit was added per id; absorb the rest of this batch's.
        for _ in 1..batch.len() {
            match self.signal.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
        }
        batch
    }

    /// Stop accepting ids and wake the consumer so it can observe the flag.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.signal.add_permits(1);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
