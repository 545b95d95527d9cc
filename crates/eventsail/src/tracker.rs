//! Bookkeeping for cooperative listener tasks.
//!
//! Every task spawned by a cooperative registry is recorded here until it
//! finishes, tagged with the emitter that spawned it. Callers enumerate the
//! pending set or wait for it to drain.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{EmitterError, ListenerResult, Result};
use crate::pool::{JobLabel, report_outcome};

/// Prefix of every tracked task name.
pub const TASK_NAME_PREFIX: &str = "listener_";

static GLOBAL_TRACKER: LazyLock<Arc<TaskTracker>> =
    LazyLock::new(|| Arc::new(TaskTracker::new()));

/// Unique identity of an emitter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmitterId(Uuid);

impl EmitterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EmitterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Which emitter spawned a task, and for which listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTag {
    pub emitter: EmitterId,
    pub listener: Arc<str>,
}

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TASK_NAME_PREFIX}{}_{}", self.emitter, self.listener)
    }
}

/// Snapshot of an unfinished task.
#[derive(Debug, Clone)]
pub struct TrackedTask {
    pub id: u64,
    pub tag: TaskTag,
    pub event: Arc<str>,
    pub started_at: OffsetDateTime,
}

impl TrackedTask {
    /// Task name in `listener_<emitter>_<listener>` form.
    pub fn name(&self) -> String {
        self.tag.to_string()
    }
}

/// Registry of in-flight cooperative tasks.
pub struct TaskTracker {
    next_id: AtomicU64,
    tasks: DashMap<u64, TrackedTask>,
    changed: Notify,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: DashMap::new(),
            changed: Notify::new(),
        }
    }

    /// The process-wide tracker shared by default-built registries.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_TRACKER)
    }

    /// Spawn `task` on `scheduler` and record it until it completes.
    ///
    /// The record is inserted before the task is spawned, so it is visible
    /// to enumeration as soon as this returns. Failures and panics are
    /// logged, never propagated.
    pub fn spawn<F>(
        self: &Arc<Self>,
        scheduler: &Handle,
        tag: TaskTag,
        event: &str,
        task: F,
    ) -> u64
    where
        F: Future<Output = ListenerResult> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let event: Arc<str> = Arc::from(event);
        let label = JobLabel::new(Arc::clone(&event), Arc::clone(&tag.listener));

        trace!(task = id, name = %tag, event = %event, "Tracking listener task");
        self.tasks.insert(
            id,
            TrackedTask {
                id,
                tag,
                event,
                started_at: OffsetDateTime::now_utc(),
            },
        );

        let guard = Untrack {
            tracker: Arc::clone(self),
            id,
        };
        scheduler.spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            report_outcome(&label, outcome);
            drop(guard);
        });
        id
    }

    /// Every unfinished task, from all emitters sharing this tracker.
    pub fn all_tasks(&self) -> std::vec::IntoIter<TrackedTask> {
        self.tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Unfinished tasks spawned by `emitter`.
    pub fn own_tasks(&self, emitter: EmitterId) -> std::vec::IntoIter<TrackedTask> {
        self.tasks
            .iter()
            .filter(|entry| entry.value().tag.emitter == emitter)
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn pending_for(&self, emitter: EmitterId) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.value().tag.emitter == emitter)
            .count()
    }

    /// Wait until no tracked task is left.
    pub async fn await_all(&self, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, || self.pending()).await
    }

    /// Wait until every task spawned by `emitter` has finished.
    pub async fn await_own(&self, emitter: EmitterId, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, || self.pending_for(emitter)).await
    }

    async fn wait_until(&self, timeout: Duration, pending: impl Fn() -> usize) -> Result<()> {
        let drained = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                // Re-check after registering so a completion in between is not missed.
                if pending() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => {
                debug!("All tracked listener tasks finished");
                Ok(())
            }
            Err(_) => Err(EmitterError::Timeout {
                pending: pending(),
                waited: timeout,
            }),
        }
    }
}

// Removes the record when the task finishes or is dropped with its runtime.
struct Untrack {
    tracker: Arc<TaskTracker>,
    id: u64,
}

impl Drop for Untrack {
    fn drop(&mut self) {
        self.tracker.tasks.remove(&self.id);
        self.tracker.changed.notify_waiters();
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTracker")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
