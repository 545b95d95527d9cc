//! Dispatch strategies.
//!
//! A registry resolves its listeners and hands each live one to a
//! [`DispatchStrategy`]. The strategy decides where the call runs:
//!
//! - [`ImmediateDispatch`] calls on the emitting thread and surfaces errors.
//! - [`ThreadPoolDispatch`] hands the call to the [`SharedWorkerPool`].
//! - [`CooperativeDispatch`] spawns cooperative bodies as tracked tasks.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::trace;

use crate::error::{EmitterError, ListenerResult, Result};
use crate::listener::{Invocation, ResolvedListener};
use crate::pool::{JobLabel, SharedWorkerPool};
use crate::tracker::{EmitterId, TaskTag, TaskTracker};

/// Where listener calls run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the emitting thread, in turn.
    #[default]
    Immediate,
    /// On the shared worker pool.
    ThreadPool,
    /// As tasks on a cooperative scheduler.
    Cooperative,
}

impl DispatchMode {
    /// Map the `is_sync` / `use_cooperative_scheduler` flag pair to a mode.
    ///
    /// `is_sync` wins when both are set.
    pub fn from_flags(is_sync: bool, use_cooperative_scheduler: bool) -> Self {
        match (is_sync, use_cooperative_scheduler) {
            (true, _) => Self::Immediate,
            (false, true) => Self::Cooperative,
            (false, false) => Self::ThreadPool,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::ThreadPool => "thread_pool",
            Self::Cooperative => "cooperative",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-emit information passed to a strategy.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub event: &'a str,
    pub emitter: EmitterId,
}

/// Runs one resolved listener for one emit.
pub trait DispatchStrategy<A>: Send + Sync {
    fn mode(&self) -> DispatchMode;

    /// Check that this emit can be dispatched at all.
    ///
    /// Called once per emit, before any listener is resolved, with the number
    /// of registered listeners whose body is cooperative. An `Err` aborts the
    /// emit without consuming once-listeners.
    fn prepare(&self, _ctx: &DispatchContext<'_>, _cooperative: usize) -> Result<()> {
        Ok(())
    }

    /// Invoke `listener` with `args`.
    ///
    /// An `Err` aborts the rest of the current emit.
    fn invoke(
        &self,
        ctx: &DispatchContext<'_>,
        listener: ResolvedListener<A>,
        args: A,
    ) -> Result<()>;
}

// ============================================================================
// Immediate
// ============================================================================

/// Calls listeners on the emitting thread.
///
/// Cooperative bodies complete before `invoke` returns. Inside a
/// multi-threaded tokio runtime they are driven in place; on a
/// current-thread runtime, or with no runtime at all, the worker pool drives
/// them while the caller waits. Listener errors come back as
/// [`EmitterError::Dispatch`]; panics unwind through the emit call.
#[derive(Debug, Default, Clone)]
pub struct ImmediateDispatch {
    pool: Option<Arc<SharedWorkerPool>>,
}

impl ImmediateDispatch {
    /// Drive cooperative bodies on the global pool when needed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive cooperative bodies on `pool` when needed.
    pub fn with_pool(pool: Arc<SharedWorkerPool>) -> Self {
        Self { pool: Some(pool) }
    }

    fn drive(
        &self,
        ctx: &DispatchContext<'_>,
        name: &Arc<str>,
        task: BoxFuture<'static, ListenerResult>,
    ) -> Result<ListenerResult> {
        if let Ok(handle) = Handle::try_current() {
            if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
                return Ok(tokio::task::block_in_place(|| handle.block_on(task)));
            }
        }

        // Blocking a current-thread runtime on its own future would hang it.
        let pool = match &self.pool {
            Some(pool) => Arc::clone(pool),
            None => SharedWorkerPool::global()?,
        };
        trace!(event = ctx.event, listener = %name, "Driving cooperative listener on the pool");
        match pool.run_to_completion(&JobLabel::new(ctx.event, Arc::clone(name)), task)? {
            Ok(outcome) => Ok(outcome),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<A: Send + 'static> DispatchStrategy<A> for ImmediateDispatch {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Immediate
    }

    fn invoke(
        &self,
        ctx: &DispatchContext<'_>,
        listener: ResolvedListener<A>,
        args: A,
    ) -> Result<()> {
        let (name, invocation) = listener.into_parts();
        let outcome = match invocation {
            Invocation::Blocking(call) => call(args),
            Invocation::Cooperative(call) => self.drive(ctx, &name, call(args))?,
        };
        outcome.map_err(|e| EmitterError::dispatch(ctx.event, &*name, e))
    }
}

// ============================================================================
// Thread pool
// ============================================================================

/// Hands every call to the shared worker pool and returns at once.
pub struct ThreadPoolDispatch {
    pool: Arc<SharedWorkerPool>,
}

impl ThreadPoolDispatch {
    pub fn new(pool: Arc<SharedWorkerPool>) -> Self {
        Self { pool }
    }
}

impl<A: Send + 'static> DispatchStrategy<A> for ThreadPoolDispatch {
    fn mode(&self) -> DispatchMode {
        DispatchMode::ThreadPool
    }

    fn invoke(
        &self,
        ctx: &DispatchContext<'_>,
        listener: ResolvedListener<A>,
        args: A,
    ) -> Result<()> {
        let (name, invocation) = listener.into_parts();
        let label = JobLabel::new(ctx.event, name);
        match invocation {
            Invocation::Blocking(call) => self.pool.submit(label, move || call(args)),
            Invocation::Cooperative(call) => self.pool.spawn(label, call(args)),
        }
        Ok(())
    }
}

impl fmt::Debug for ThreadPoolDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolDispatch")
            .field("pool", &self.pool)
            .finish()
    }
}

// ============================================================================
// Cooperative
// ============================================================================

/// Spawns cooperative bodies on a tokio scheduler and records them.
///
/// Blocking bodies would stall the scheduler, so they go to the worker pool
/// instead and need no scheduler. An emit reaching a cooperative body without
/// a scheduler fails with [`EmitterError::NoScheduler`].
pub struct CooperativeDispatch {
    scheduler: Option<Handle>,
    tracker: Arc<TaskTracker>,
    pool: Arc<SharedWorkerPool>,
}

impl CooperativeDispatch {
    /// `scheduler` pins tasks to one runtime; `None` uses whichever runtime
    /// is current at emit time.
    pub fn new(
        scheduler: Option<Handle>,
        tracker: Arc<TaskTracker>,
        pool: Arc<SharedWorkerPool>,
    ) -> Self {
        Self {
            scheduler,
            tracker,
            pool,
        }
    }

    fn scheduler(&self) -> Result<Handle> {
        match &self.scheduler {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| EmitterError::NoScheduler),
        }
    }
}

impl<A: Send + 'static> DispatchStrategy<A> for CooperativeDispatch {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Cooperative
    }

    fn prepare(&self, _ctx: &DispatchContext<'_>, cooperative: usize) -> Result<()> {
        if cooperative > 0 {
            self.scheduler()?;
        }
        Ok(())
    }

    fn invoke(
        &self,
        ctx: &DispatchContext<'_>,
        listener: ResolvedListener<A>,
        args: A,
    ) -> Result<()> {
        let (name, invocation) = listener.into_parts();
        match invocation {
            Invocation::Cooperative(call) => {
                let scheduler = self.scheduler()?;
                let tag = TaskTag {
                    emitter: ctx.emitter,
                    listener: name,
                };
                let id = self.tracker.spawn(&scheduler, tag, ctx.event, call(args));
                trace!(event = ctx.event, task = id, "Spawned cooperative listener");
            }
            Invocation::Blocking(call) => {
                self.pool
                    .submit(JobLabel::new(ctx.event, name), move || call(args));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CooperativeDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeDispatch")
            .field("pinned_scheduler", &self.scheduler.is_some())
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
