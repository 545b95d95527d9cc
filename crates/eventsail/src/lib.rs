//! In-process publish/subscribe with non-owning listeners.
//!
//! Named events accept any number of listeners; emitting an event calls every
//! listener that is still alive with a clone of the payload.
//!
//! ```text
//!   Event<A> ──► ListenerRegistry<A> ──► DispatchStrategy<A>
//!                 │  event → {key → handle}      │
//!                 │  (Weak targets, once-wrappers)├─ Immediate   caller thread
//!                 │                              ├─ ThreadPool  SharedWorkerPool
//!                 ▼                              └─ Cooperative tokio task ─► TaskTracker
//!           InstanceRegistry
//!      (one registry per payload type and mode)
//! ```
//!
//! The registry holds only weak references. A listener stays subscribed for
//! as long as its owner keeps the [`Listener`] value (or the `Arc` of a bound
//! method) alive; afterwards it is pruned on the next emit with a warning.
//!
//! # Quick start
//!
//! ```
//! use eventsail::{DispatchMode, Event, Listener};
//!
//! let greeted = Event::<String>::new("greeted", DispatchMode::Immediate).unwrap();
//! let printer = Listener::blocking("printer", |name: String| {
//!     println!("hello, {name}");
//!     Ok(())
//! });
//!
//! greeted.subscribe(&printer);
//! greeted.emit("ferris".to_string()).unwrap();
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod instances;
pub mod listener;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod tracker;

use std::sync::Arc;

pub use config::{EventsailConfig, LoggingConfig, WorkerPoolConfig};
pub use dispatch::{
    CooperativeDispatch, DispatchContext, DispatchMode, DispatchStrategy, ImmediateDispatch,
    ThreadPoolDispatch,
};
pub use error::{EmitterError, ListenerError, ListenerResult, Result};
pub use event::{Event, event};
pub use instances::{Configured, InstanceRegistry};
pub use listener::{Listener, ListenerHandle, ListenerKey};
pub use pool::{JobLabel, SharedWorkerPool};
pub use registry::{EmitterConfig, ListenerRegistry, ListenerRegistryBuilder};
pub use tracker::{EmitterId, TaskTag, TaskTracker, TrackedTask};

/// Install tracing and the process-wide worker pool from `config`.
///
/// Call once at startup, before the first emitter is built; a pool created
/// earlier with defaults is kept as is. Calling it again only re-applies the
/// logging level. The returned pool is never dropped: call
/// [`SharedWorkerPool::shutdown_global`] before exiting so running listener
/// calls can finish.
pub fn init(config: &EventsailConfig) -> Result<Arc<SharedWorkerPool>> {
    config.validate().map_err(EmitterError::configuration)?;
    if !observability::init_tracing_from(&config.logging) {
        observability::apply_logging_level(&config.logging.level);
    }
    SharedWorkerPool::init_global(&config.worker_pool)
}
