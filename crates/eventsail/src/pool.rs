//! Process-wide worker pool for off-loaded listener calls.
//!
//! The pool owns a dedicated multi-threaded tokio runtime. Blocking listener
//! bodies run on its blocking pool, cooperative bodies on its workers. Each
//! side is capped at the configured size on its own, which defaults to the
//! host's available parallelism, so the pool may own up to twice that many
//! threads. Submission is unbounded.
//!
//! The process-wide pool lives in a static and is never dropped. Call
//! [`SharedWorkerPool::shutdown_global`] before exiting to let running
//! listener calls finish.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::BoxFuture;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::error::{EmitterError, ListenerResult, Result};

static GLOBAL_POOL: OnceLock<Arc<SharedWorkerPool>> = OnceLock::new();

// ============================================================================
// Job labels and outcome reporting
// ============================================================================

/// Identifies an off-loaded listener call in diagnostics.
#[derive(Debug, Clone)]
pub struct JobLabel {
    event: Arc<str>,
    listener: Arc<str>,
}

impl JobLabel {
    pub fn new(event: impl Into<Arc<str>>, listener: impl Into<Arc<str>>) -> Self {
        Self {
            event: event.into(),
            listener: listener.into(),
        }
    }
}

/// Log the outcome of an isolated listener call.
///
/// Failures and panics stop here: they never reach the emitter's caller.
pub(crate) fn report_outcome(label: &JobLabel, outcome: std::thread::Result<ListenerResult>) {
    match outcome {
        Ok(Ok(())) => {
            debug!(event = %label.event, listener = %label.listener, "Listener completed");
        }
        Ok(Err(e)) => {
            warn!(
                event = %label.event,
                listener = %label.listener,
                error = %e,
                "Listener failed"
            );
        }
        Err(panic) => {
            error!(
                event = %label.event,
                listener = %label.listener,
                panic = %panic_message(panic.as_ref()),
                "Listener panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

// ============================================================================
// In-flight accounting
// ============================================================================

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard(Arc::clone(self))
    }

    fn current(&self) -> usize {
        *self.count.lock()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Bounded thread pool shared by the pooled and cooperative dispatch modes.
///
/// `size` bounds concurrent blocking jobs and async worker threads
/// separately. At most `2 * size` pool threads exist at once.
pub struct SharedWorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    size: usize,
    in_flight: Arc<InFlight>,
}

impl SharedWorkerPool {
    /// Create a private pool.
    ///
    /// Most callers want [`SharedWorkerPool::global`]; private pools exist for
    /// isolation in tests and embedding.
    pub fn new(config: &WorkerPoolConfig) -> Result<Self> {
        let size = config.size.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .max_blocking_threads(size)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| EmitterError::worker_pool(e.to_string()))?;
        let handle = runtime.handle().clone();

        debug!(size, thread_name = %config.thread_name, "Created worker pool");

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            size,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// The process-wide pool, created on first use with default settings.
    ///
    /// The pool is never dropped; see [`shutdown_global`](Self::shutdown_global).
    pub fn global() -> Result<Arc<Self>> {
        Self::init_global(&WorkerPoolConfig::default())
    }

    /// Create the process-wide pool with `config` unless it already exists.
    ///
    /// Returns the existing pool when one was installed earlier; `config` is
    /// ignored in that case. Like [`global`](Self::global), the pool outlives
    /// every registry and must be stopped with
    /// [`shutdown_global`](Self::shutdown_global).
    pub fn init_global(config: &WorkerPoolConfig) -> Result<Arc<Self>> {
        if let Some(pool) = GLOBAL_POOL.get() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(Self::new(config)?);
        if GLOBAL_POOL.set(Arc::clone(&pool)).is_ok() {
            info!(size = pool.size, "Initialized global worker pool");
        }
        GLOBAL_POOL
            .get()
            .cloned()
            .ok_or_else(|| EmitterError::internal("global worker pool missing after init"))
    }

    /// Run a blocking listener call on the pool.
    ///
    /// Returns immediately. Errors and panics from `job` are logged and
    /// contained.
    pub fn submit<F>(&self, label: JobLabel, job: F)
    where
        F: FnOnce() -> ListenerResult + Send + 'static,
    {
        let guard = self.in_flight.enter();
        self.handle.spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(job));
            report_outcome(&label, outcome);
            drop(guard);
        });
    }

    /// Drive a cooperative listener body on the pool's workers.
    pub fn spawn(&self, label: JobLabel, task: BoxFuture<'static, ListenerResult>) {
        let guard = self.in_flight.enter();
        self.handle.spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            report_outcome(&label, outcome);
            drop(guard);
        });
    }

    /// Drive `task` on the pool's workers and block until it finishes.
    ///
    /// For callers that cannot poll the future themselves, such as a thread
    /// owning a current-thread runtime. The inner result carries the panic
    /// payload when `task` panicked. Fails when the pool stops before the
    /// task completes.
    pub fn run_to_completion(
        &self,
        label: &JobLabel,
        task: BoxFuture<'static, ListenerResult>,
    ) -> Result<std::thread::Result<ListenerResult>> {
        let (done, outcome) = oneshot::channel();
        let guard = self.in_flight.enter();
        self.handle.spawn(async move {
            let _ = done.send(AssertUnwindSafe(task).catch_unwind().await);
            drop(guard);
        });
        futures::executor::block_on(outcome).map_err(|_| {
            EmitterError::worker_pool(format!(
                "pool stopped before listener '{}' of '{}' finished",
                label.listener, label.event
            ))
        })
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Block the calling thread until no job is in flight.
    ///
    /// Returns `false` if `timeout` elapsed first. Do not call this from a
    /// pool thread.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.in_flight.wait_idle(timeout)
    }

    /// Maximum number of concurrently running blocking jobs, and separately
    /// the number of async worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting work and wait up to `timeout` for running jobs.
    ///
    /// Jobs submitted afterwards are dropped without running. Must be called
    /// outside of an async context.
    pub fn shutdown(&self, timeout: Duration) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            info!(
                in_flight = self.in_flight(),
                timeout_ms = timeout.as_millis() as u64,
                "Shutting down worker pool"
            );
            runtime.shutdown_timeout(timeout);
        }
    }

    /// [`shutdown`](Self::shutdown) the process-wide pool, if one was created.
    ///
    /// Returns `false` when no global pool exists. Registries built on the
    /// global pool drop pooled calls afterwards.
    pub fn shutdown_global(timeout: Duration) -> bool {
        match GLOBAL_POOL.get() {
            Some(pool) => {
                pool.shutdown(timeout);
                true
            }
            None => false,
        }
    }
}

impl Drop for SharedWorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for SharedWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWorkerPool")
            .field("size", &self.size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
