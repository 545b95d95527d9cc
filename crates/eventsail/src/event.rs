//! Single-event facade.
//!
//! An [`Event`] binds one event name to a shared [`ListenerRegistry`]. Every
//! facade with the same payload type and dispatch mode talks to the same
//! registry, so listeners subscribed through one `Event` value are seen by
//! any other `Event` of the same name.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::dispatch::DispatchMode;
use crate::error::Result;
use crate::instances::InstanceRegistry;
use crate::listener::ListenerHandle;
use crate::registry::{EmitterConfig, ListenerRegistry};
use crate::tracker::TrackedTask;

/// How long [`Event::wait_for_async_tasks`] waits by default.
pub const DEFAULT_TASK_WAIT: Duration = Duration::from_secs(10);

/// A named event backed by a shared registry.
pub struct Event<A> {
    name: String,
    registry: Arc<ListenerRegistry<A>>,
}

impl<A: Clone + Send + 'static> Event<A> {
    /// Bind `name` to the process-wide registry for `mode`.
    pub fn new(name: impl Into<String>, mode: DispatchMode) -> Result<Self> {
        Self::with_instances(name, mode, InstanceRegistry::global())
    }

    /// Bind `name` to the registry for `mode` held in `instances`.
    pub fn with_instances(
        name: impl Into<String>,
        mode: DispatchMode,
        instances: &InstanceRegistry,
    ) -> Result<Self> {
        let registry = instances.get_or_create::<ListenerRegistry<A>>(&EmitterConfig { mode })?;
        Ok(Self {
            name: name.into(),
            registry,
        })
    }

    /// Build from the `is_sync` / `use_cooperative_scheduler` flag pair.
    ///
    /// See [`DispatchMode::from_flags`].
    pub fn from_flags(
        name: impl Into<String>,
        is_sync: bool,
        use_cooperative_scheduler: bool,
    ) -> Result<Self> {
        Self::new(name, DispatchMode::from_flags(is_sync, use_cooperative_scheduler))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> DispatchMode {
        self.registry.mode()
    }

    /// The registry this event is bound to.
    pub fn registry(&self) -> &Arc<ListenerRegistry<A>> {
        &self.registry
    }

    pub fn subscribe(&self, listener: impl Into<ListenerHandle<A>>) {
        self.registry.subscribe(&self.name, listener);
    }

    pub fn unsubscribe(&self, listener: impl Into<ListenerHandle<A>>) {
        self.registry.unsubscribe(&self.name, listener);
    }

    pub fn once(&self, listener: impl Into<ListenerHandle<A>>) {
        self.registry.once(&self.name, listener);
    }

    pub fn emit(&self, args: A) -> Result<()> {
        self.registry.emit(&self.name, args)
    }

    /// Drop every listener of this event.
    ///
    /// Fails with [`EmitterError::EventNotFound`](crate::EmitterError::EventNotFound)
    /// when nothing was ever subscribed.
    pub fn clear(&self) -> Result<()> {
        self.registry.clear(&self.name)
    }

    /// Unfinished tasks spawned by this event's registry.
    ///
    /// Only cooperative events spawn tasks; other modes log a warning and
    /// return `None`.
    pub fn own_tasks(&self) -> Option<std::vec::IntoIter<TrackedTask>> {
        if self.mode() != DispatchMode::Cooperative {
            warn!(
                event = %self.name,
                mode = %self.mode(),
                "Event is not cooperative, it has no tasks"
            );
            return None;
        }
        Some(self.registry.own_tasks())
    }

    /// Unfinished tasks of every cooperative registry sharing the tracker.
    pub fn all_tasks(&self) -> std::vec::IntoIter<TrackedTask> {
        self.registry.all_tasks()
    }

    /// Wait up to ten seconds for every tracked task to finish.
    pub async fn wait_for_async_tasks(&self) -> Result<()> {
        self.wait_for_async_tasks_with(DEFAULT_TASK_WAIT).await
    }

    pub async fn wait_for_async_tasks_with(&self, timeout: Duration) -> Result<()> {
        self.registry.await_tasks(timeout).await
    }
}

/// Shorthand for [`Event::from_flags`].
pub fn event<A: Clone + Send + 'static>(
    name: impl Into<String>,
    is_sync: bool,
    use_cooperative_scheduler: bool,
) -> Result<Event<A>> {
    Event::from_flags(name, is_sync, use_cooperative_scheduler)
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmitterError;
    use crate::listener::Listener;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_events_share_registry_per_mode() {
        let instances = InstanceRegistry::new();
        let a = Event::<Ping>::with_instances("ping", DispatchMode::Immediate, &instances).unwrap();
        let b = Event::<Ping>::with_instances("pong", DispatchMode::Immediate, &instances).unwrap();
        let c = Event::<Ping>::with_instances("ping", DispatchMode::ThreadPool, &instances)
            .unwrap();

        assert!(Arc::ptr_eq(a.registry(), b.registry()));
        assert!(!Arc::ptr_eq(a.registry(), c.registry()));
        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn test_subscription_visible_through_other_facade() {
        let instances = InstanceRegistry::new();
        let first = Event::<Ping>::with_instances("ping", DispatchMode::Immediate, &instances)
            .unwrap();
        let second = Event::<Ping>::with_instances("ping", DispatchMode::Immediate, &instances)
            .unwrap();
        let seen = Arc::new(AtomicU32::new(0));
        let counted = seen.clone();
        let listener = Listener::blocking("record", move |ping: Ping| {
            counted.store(ping.seq, Ordering::SeqCst);
            Ok(())
        });

        first.subscribe(&listener);
        second.emit(Ping { seq: 42 }).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_clear_unknown_event() {
        let instances = InstanceRegistry::new();
        let event = Event::<Ping>::with_instances("never", DispatchMode::Immediate, &instances)
            .unwrap();
        assert!(matches!(event.clear(), Err(EmitterError::EventNotFound(_))));
    }

    #[test]
    fn test_own_tasks_requires_cooperative_mode() {
        let instances = InstanceRegistry::new();
        let event = Event::<Ping>::with_instances("ping", DispatchMode::Immediate, &instances)
            .unwrap();
        assert!(event.own_tasks().is_none());
    }

    #[tokio::test]
    async fn test_cooperative_event_waits_for_tasks() {
        let instances = InstanceRegistry::new();
        let event =
            Event::<Ping>::with_instances("ping", DispatchMode::Cooperative, &instances).unwrap();
        let done = Arc::new(AtomicU32::new(0));
        let counted = done.clone();
        let listener = Listener::cooperative("slow", move |_: Ping| {
            let counted = counted.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        event.subscribe(&listener);
        event.emit(Ping { seq: 1 }).unwrap();
        assert_eq!(event.own_tasks().map(|tasks| tasks.count()), Some(1));

        event
            .wait_for_async_tasks_with(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
