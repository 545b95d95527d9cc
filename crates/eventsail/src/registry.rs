//! Listener registry.
//!
//! Maps event names to the set of handles subscribed to them and fans an
//! emit out to every live handle through the configured dispatch strategy.
//!
//! # Locking
//!
//! Per-event sets live in a sharded [`DashMap`]. Every mutation goes through
//! the map's entry locks. `emit` copies the set under a read guard and
//! releases it before dispatching, so listeners are free to subscribe,
//! unsubscribe or emit on the same registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::dispatch::{
    CooperativeDispatch, DispatchContext, DispatchMode, DispatchStrategy, ImmediateDispatch,
    ThreadPoolDispatch,
};
use crate::error::{EmitterError, Result};
use crate::instances::Configured;
use crate::listener::{ListenerHandle, ListenerKey, Resolution};
use crate::pool::SharedWorkerPool;
use crate::tracker::{EmitterId, TaskTracker, TrackedTask};

type ListenerSet<A> = HashMap<ListenerKey, ListenerHandle<A>>;

/// Configuration identifying a shared emitter in an
/// [`InstanceRegistry`](crate::InstanceRegistry).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EmitterConfig {
    pub mode: DispatchMode,
}

/// Event name to listener-set registry with pluggable dispatch.
pub struct ListenerRegistry<A> {
    id: EmitterId,
    listeners: DashMap<String, ListenerSet<A>>,
    strategy: Box<dyn DispatchStrategy<A>>,
    tracker: Arc<TaskTracker>,
}

impl<A: Clone + Send + 'static> ListenerRegistry<A> {
    pub fn builder(mode: DispatchMode) -> ListenerRegistryBuilder<A> {
        ListenerRegistryBuilder::new(mode)
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Register `listener` under `event`.
    ///
    /// Subscribing the same listener twice keeps a single registration.
    pub fn subscribe(&self, event: &str, listener: impl Into<ListenerHandle<A>>) {
        let handle = listener.into();
        let mut set = self.listeners.entry(event.to_owned()).or_default();
        match set.entry(handle.key().clone()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                trace!(event, listener = handle.name(), "Listener already subscribed");
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                debug!(event, listener = handle.name(), "Listener subscribed");
                slot.insert(handle);
            }
        }
    }

    /// Register `listener` to run on the next emit of `event` only.
    ///
    /// Each call registers a separate once-listener, even for a target that
    /// is already subscribed.
    pub fn once(&self, event: &str, listener: impl Into<ListenerHandle<A>>) {
        self.subscribe(event, ListenerHandle::once(listener.into()));
    }

    /// Remove `listener` from `event`.
    ///
    /// Pending once-registrations of the same target are removed too.
    /// Unknown events and listeners are ignored. An event whose set is
    /// already empty is dropped entirely.
    pub fn unsubscribe(&self, event: &str, listener: impl Into<ListenerHandle<A>>) {
        let handle = listener.into();
        let key = handle.key();

        let Entry::Occupied(mut entry) = self.listeners.entry(event.to_owned()) else {
            return;
        };
        if entry.get().is_empty() {
            entry.remove();
            debug!(event, "Removed empty event");
            return;
        }

        let set = entry.get_mut();
        let before = set.len();
        set.remove(key);
        set.retain(|_, registered| registered.wrapped_key() != Some(key));
        if set.len() < before {
            debug!(event, listener = handle.name(), "Listener unsubscribed");
        }
    }

    /// Remove `event` and all of its listeners.
    ///
    /// Unlike [`unsubscribe`](Self::unsubscribe), an unknown event is an
    /// error.
    pub fn clear(&self, event: &str) -> Result<()> {
        match self.listeners.remove(event) {
            Some((_, set)) => {
                debug!(event, listeners = set.len(), "Event cleared");
                Ok(())
            }
            None => Err(EmitterError::event_not_found(event)),
        }
    }

    // ========================================================================
    // Emit
    // ========================================================================

    /// Invoke every live listener of `event` with `args`.
    ///
    /// Emitting an event without listeners does nothing. Expired listeners
    /// are pruned with a warning. Immediate dispatch surfaces the first
    /// listener error, which stops the emit. A cooperative registry fails
    /// with [`EmitterError::NoScheduler`] before touching any listener when a
    /// cooperative body is registered and no scheduler is reachable.
    pub fn emit(&self, event: &str, args: A) -> Result<()> {
        let snapshot: Vec<ListenerHandle<A>> = match self.listeners.get(event) {
            Some(set) => set.values().cloned().collect(),
            None => return Ok(()),
        };
        if snapshot.is_empty() {
            return Ok(());
        }

        trace!(event, listeners = snapshot.len(), mode = %self.mode(), "Emitting event");
        let ctx = DispatchContext {
            event,
            emitter: self.id,
        };
        let cooperative = snapshot.iter().filter(|h| h.is_cooperative()).count();
        self.strategy.prepare(&ctx, cooperative)?;

        for handle in snapshot {
            match handle.resolve() {
                Resolution::Live(listener) => {
                    self.strategy.invoke(&ctx, listener, args.clone())?;
                }
                Resolution::Claimed(listener) => {
                    self.remove_handle(event, handle.key());
                    self.strategy.invoke(&ctx, listener, args.clone())?;
                }
                Resolution::Spent => {}
                Resolution::Expired => {
                    warn!(
                        event,
                        listener = handle.name(),
                        "Listener is dead, removing it"
                    );
                    self.remove_handle(event, handle.key());
                }
            }
        }
        Ok(())
    }

    fn remove_handle(&self, event: &str, key: &ListenerKey) {
        if let Some(mut set) = self.listeners.get_mut(event) {
            set.remove(key);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of registered handles for `event`, including ones that have
    /// expired but were not pruned yet.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, |set| set.len())
    }

    pub fn contains_event(&self, event: &str) -> bool {
        self.listeners.contains_key(event)
    }

    /// Names of all events with an entry, in no particular order.
    pub fn events(&self) -> Vec<String> {
        self.listeners.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    pub fn mode(&self) -> DispatchMode {
        self.strategy.mode()
    }

    // ========================================================================
    // Cooperative tasks
    // ========================================================================

    /// Unfinished tasks spawned by this registry.
    pub fn own_tasks(&self) -> std::vec::IntoIter<TrackedTask> {
        self.tracker.own_tasks(self.id)
    }

    /// Unfinished tasks of every registry sharing this registry's tracker.
    pub fn all_tasks(&self) -> std::vec::IntoIter<TrackedTask> {
        self.tracker.all_tasks()
    }

    /// Wait for every task on this registry's tracker to finish.
    pub async fn await_tasks(&self, timeout: Duration) -> Result<()> {
        self.tracker.await_all(timeout).await
    }

    /// Wait for the tasks spawned by this registry to finish.
    pub async fn await_own_tasks(&self, timeout: Duration) -> Result<()> {
        self.tracker.await_own(self.id, timeout).await
    }
}

impl<A: Clone + Send + 'static> Configured for ListenerRegistry<A> {
    type Config = EmitterConfig;

    fn construct(config: &EmitterConfig) -> Result<Self> {
        Self::builder(config.mode).build()
    }
}

impl<A> fmt::Debug for ListenerRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("id", &self.id)
            .field("mode", &self.strategy.mode())
            .field("events", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ListenerRegistry`].
///
/// Without explicit overrides the registry uses the process-wide worker pool
/// and task tracker. The pool is only touched by modes that need it; an
/// immediate registry reaches for it only to drive a cooperative body outside
/// a multi-threaded runtime.
pub struct ListenerRegistryBuilder<A> {
    mode: DispatchMode,
    pool: Option<Arc<SharedWorkerPool>>,
    tracker: Option<Arc<TaskTracker>>,
    scheduler: Option<Handle>,
    _args: std::marker::PhantomData<fn(A)>,
}

impl<A: Clone + Send + 'static> ListenerRegistryBuilder<A> {
    fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            pool: None,
            tracker: None,
            scheduler: None,
            _args: std::marker::PhantomData,
        }
    }

    pub fn worker_pool(mut self, pool: Arc<SharedWorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn task_tracker(mut self, tracker: Arc<TaskTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Pin cooperative tasks to `scheduler` instead of the runtime current
    /// at emit time.
    pub fn scheduler(mut self, scheduler: Handle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<ListenerRegistry<A>> {
        let tracker = self.tracker.unwrap_or_else(TaskTracker::global);
        let strategy: Box<dyn DispatchStrategy<A>> = match self.mode {
            DispatchMode::Immediate => match self.pool {
                Some(pool) => Box::new(ImmediateDispatch::with_pool(pool)),
                None => Box::new(ImmediateDispatch::new()),
            },
            DispatchMode::ThreadPool => {
                Box::new(ThreadPoolDispatch::new(resolve_pool(self.pool)?))
            }
            DispatchMode::Cooperative => Box::new(CooperativeDispatch::new(
                self.scheduler,
                Arc::clone(&tracker),
                resolve_pool(self.pool)?,
            )),
        };

        let registry = ListenerRegistry {
            id: EmitterId::new(),
            listeners: DashMap::new(),
            strategy,
            tracker,
        };
        debug!(emitter = %registry.id, mode = %self.mode, "Created listener registry");
        Ok(registry)
    }
}

fn resolve_pool(pool: Option<Arc<SharedWorkerPool>>) -> Result<Arc<SharedWorkerPool>> {
    match pool {
        Some(pool) => Ok(pool),
        None => SharedWorkerPool::global(),
    }
}

impl<A> fmt::Debug for ListenerRegistryBuilder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistryBuilder")
            .field("mode", &self.mode)
            .field("custom_pool", &self.pool.is_some())
            .field("custom_tracker", &self.tracker.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;
    use crate::listener::Listener;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn immediate() -> ListenerRegistry<u32> {
        ListenerRegistry::builder(DispatchMode::Immediate)
            .task_tracker(Arc::new(TaskTracker::new()))
            .build()
            .unwrap()
    }

    fn private_pool() -> Arc<SharedWorkerPool> {
        Arc::new(
            SharedWorkerPool::new(&crate::config::WorkerPoolConfig {
                size: 2,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn cooperative_counter(name: &str) -> (Listener<u32>, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counted = hits.clone();
        let listener = Listener::cooperative(name, move |_: u32| {
            let counted = counted.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (listener, hits)
    }

    fn counter(name: &str) -> (Listener<u32>, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counted = hits.clone();
        let listener = Listener::blocking(name, move |_: u32| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (listener, hits)
    }

    struct Sensor {
        readings: AtomicU32,
    }

    impl Sensor {
        fn on_reading(&self, value: u32) -> crate::error::ListenerResult {
            self.readings.fetch_add(value, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sensor_handle(sensor: &Arc<Sensor>) -> ListenerHandle<u32> {
        ListenerHandle::bound(sensor, "on_reading", Sensor::on_reading)
    }

    #[test]
    fn test_duplicate_subscribe_invokes_once() {
        let registry = immediate();
        let (listener, hits) = counter("count");

        registry.subscribe("ping", &listener);
        registry.subscribe("ping", &listener);
        registry.emit("ping", 1).unwrap();

        assert_eq!(registry.listener_count("ping"), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let registry = immediate();
        registry.emit("nobody", 1).unwrap();
        assert!(!registry.contains_event("nobody"));
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry = immediate();
        let (listener, hits) = counter("count");
        let (stranger, _) = counter("stranger");

        registry.unsubscribe("ping", &listener);
        registry.subscribe("ping", &listener);
        registry.unsubscribe("ping", &stranger);
        registry.emit("ping", 1).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_drops_entry_once_empty() {
        let registry = immediate();
        let (listener, _) = counter("count");

        registry.subscribe("ping", &listener);
        registry.unsubscribe("ping", &listener);
        assert!(registry.contains_event("ping"));
        assert_eq!(registry.listener_count("ping"), 0);

        registry.unsubscribe("ping", &listener);
        assert!(!registry.contains_event("ping"));
    }

    #[test]
    fn test_clear_unknown_event_fails() {
        let registry = immediate();
        let err = registry.clear("ping").unwrap_err();
        assert!(matches!(err, EmitterError::EventNotFound(ref e) if e == "ping"));
    }

    #[test]
    fn test_clear_empty_event_succeeds() {
        let registry = immediate();
        let (listener, hits) = counter("count");

        registry.subscribe("ping", &listener);
        registry.unsubscribe("ping", &listener);
        registry.clear("ping").unwrap();
        registry.emit("ping", 1).unwrap();

        assert!(registry.events().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let registry = immediate();
        let (listener, hits) = counter("count");

        registry.once("ping", &listener);
        registry.emit("ping", 1).unwrap();
        registry.emit("ping", 1).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count("ping"), 0);
    }

    #[test]
    fn test_once_alongside_plain_subscription() {
        let registry = immediate();
        let (listener, hits) = counter("count");

        registry.subscribe("ping", &listener);
        registry.once("ping", &listener);
        registry.emit("ping", 1).unwrap();
        registry.emit("ping", 1).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(registry.listener_count("ping"), 1);
    }

    #[test]
    fn test_unsubscribe_cancels_pending_once() {
        let registry = immediate();
        let (listener, hits) = counter("count");

        registry.once("ping", &listener);
        registry.unsubscribe("ping", &listener);
        registry.emit("ping", 1).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_once_under_concurrent_emits() {
        let registry = Arc::new(immediate());
        let (listener, hits) = counter("count");
        registry.once("ping", &listener);

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.emit("ping", 1).unwrap();
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count("ping"), 0);
    }

    #[test]
    fn test_concurrent_subscribe_unsubscribe_and_emit() {
        const ROUNDS: usize = 200;
        let registry = Arc::new(immediate());
        let counters: Vec<_> = (0..4).map(|i| counter(&format!("churn{i}"))).collect();
        let listeners: Vec<_> = counters.iter().map(|(l, _)| l.clone()).collect();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let mut threads = Vec::new();
        for listener in listeners {
            let registry = registry.clone();
            let barrier = barrier.clone();
            threads.push(std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    registry.subscribe("ping", &listener);
                    registry.unsubscribe("ping", &listener);
                }
                registry.subscribe("ping", &listener);
            }));
        }
        let emitters: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        registry.emit("ping", 1).unwrap();
                    }
                })
            })
            .collect();

        for thread in threads.into_iter().chain(emitters) {
            thread.join().unwrap();
        }
        assert_eq!(registry.listener_count("ping"), 4);

        let before: Vec<_> = counters
            .iter()
            .map(|(_, hits)| hits.load(Ordering::SeqCst))
            .collect();
        registry.emit("ping", 1).unwrap();
        for ((_, hits), seen) in counters.iter().zip(before) {
            assert_eq!(hits.load(Ordering::SeqCst), seen + 1);
        }
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let registry = immediate();
        let (listener, hits) = counter("count");

        registry.subscribe("ping", &listener);
        drop(listener);
        assert_eq!(registry.listener_count("ping"), 1);

        registry.emit("ping", 1).unwrap();
        assert_eq!(registry.listener_count("ping"), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bound_listener_follows_owner_lifetime() {
        let registry = immediate();
        let sensor = Arc::new(Sensor {
            readings: AtomicU32::new(0),
        });

        registry.subscribe("reading", sensor_handle(&sensor));
        registry.subscribe("reading", sensor_handle(&sensor));
        registry.emit("reading", 5).unwrap();
        assert_eq!(sensor.readings.load(Ordering::SeqCst), 5);
        assert_eq!(registry.listener_count("reading"), 1);

        registry.unsubscribe("reading", sensor_handle(&sensor));
        registry.emit("reading", 5).unwrap();
        assert_eq!(sensor.readings.load(Ordering::SeqCst), 5);

        registry.subscribe("reading", sensor_handle(&sensor));
        drop(sensor);
        registry.emit("reading", 5).unwrap();
        assert_eq!(registry.listener_count("reading"), 0);
    }

    #[test]
    fn test_immediate_error_stops_the_emit() {
        let registry = immediate();
        let calls = Arc::new(AtomicU32::new(0));
        let make = |name: &str| {
            let calls = calls.clone();
            Listener::blocking(name, move |_: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ListenerError::execution("rejected"))
            })
        };
        let first = make("first");
        let second = make("second");

        registry.subscribe("ping", &first);
        registry.subscribe("ping", &second);
        let err = registry.emit("ping", 1).unwrap_err();

        assert!(err.is_listener_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let registry = Arc::new(immediate());
        let (late, late_hits) = counter("late");
        let weak = Arc::downgrade(&registry);
        let subscriber = Listener::blocking("subscriber", move |_: u32| {
            if let Some(registry) = weak.upgrade() {
                registry.subscribe("ping", &late);
            }
            Ok(())
        });

        registry.subscribe("ping", &subscriber);
        registry.emit("ping", 1).unwrap();
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.listener_count("ping"), 2);

        registry.emit("ping", 1).unwrap();
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_pool_registry_dispatches_off_thread() {
        let pool = Arc::new(
            SharedWorkerPool::new(&crate::config::WorkerPoolConfig {
                size: 2,
                ..Default::default()
            })
            .unwrap(),
        );
        let registry = ListenerRegistry::<u32>::builder(DispatchMode::ThreadPool)
            .worker_pool(pool.clone())
            .build()
            .unwrap();
        let caller = std::thread::current().id();
        let off_thread = Arc::new(AtomicU32::new(0));
        let seen = off_thread.clone();
        let listener = Listener::blocking("where", move |_: u32| {
            if std::thread::current().id() != caller {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        let failing = Listener::blocking("fails", |_: u32| Err(ListenerError::execution("no")));

        registry.subscribe("ping", &listener);
        registry.subscribe("ping", &failing);
        registry.emit("ping", 1).unwrap();

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(off_thread.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cooperative_registry_tracks_tasks() {
        let registry = ListenerRegistry::<u32>::builder(DispatchMode::Cooperative)
            .task_tracker(Arc::new(TaskTracker::new()))
            .build()
            .unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let listeners: Vec<_> = (0..3)
            .map(|i| {
                let hits = hits.clone();
                Listener::cooperative(format!("job{i}"), move |n: u32| {
                    let hits = hits.clone();
                    async move {
                        tokio::task::yield_now().await;
                        hits.fetch_add(n, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .collect();
        for listener in &listeners {
            registry.subscribe("ping", listener);
        }

        registry.emit("ping", 1).unwrap();
        assert_eq!(registry.own_tasks().count(), 3);

        registry.await_own_tasks(Duration::from_secs(5)).await.unwrap();
        assert_eq!(registry.own_tasks().count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cooperative_emit_without_runtime_fails() {
        let registry = ListenerRegistry::<u32>::builder(DispatchMode::Cooperative)
            .task_tracker(Arc::new(TaskTracker::new()))
            .build()
            .unwrap();
        let listener = Listener::cooperative("job", |_: u32| async { Ok(()) });

        registry.subscribe("ping", &listener);
        let err = registry.emit("ping", 1).unwrap_err();
        assert!(matches!(err, EmitterError::NoScheduler));
    }

    #[test]
    fn test_failed_cooperative_emit_keeps_once_listener() {
        let registry = ListenerRegistry::<u32>::builder(DispatchMode::Cooperative)
            .task_tracker(Arc::new(TaskTracker::new()))
            .worker_pool(private_pool())
            .build()
            .unwrap();
        let (listener, hits) = cooperative_counter("job");

        registry.once("ping", &listener);
        let err = registry.emit("ping", 1).unwrap_err();
        assert!(matches!(err, EmitterError::NoScheduler));
        assert_eq!(registry.listener_count("ping"), 1);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            registry.emit("ping", 1).unwrap();
            registry.await_own_tasks(Duration::from_secs(5)).await.unwrap();
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count("ping"), 0);
    }

    #[test]
    fn test_cooperative_registry_runs_blocking_listeners_without_runtime() {
        let pool = private_pool();
        let registry = ListenerRegistry::<u32>::builder(DispatchMode::Cooperative)
            .task_tracker(Arc::new(TaskTracker::new()))
            .worker_pool(pool.clone())
            .build()
            .unwrap();
        let (listener, hits) = counter("now");

        registry.subscribe("ping", &listener);
        registry.emit("ping", 1).unwrap();

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_registry_drives_cooperative_body_on_current_thread_runtime() {
        let registry = ListenerRegistry::<u32>::builder(DispatchMode::Immediate)
            .task_tracker(Arc::new(TaskTracker::new()))
            .worker_pool(private_pool())
            .build()
            .unwrap();
        let (listener, hits) = cooperative_counter("sleeper");

        registry.subscribe("ping", &listener);
        registry.emit("ping", 1).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_registry_drives_cooperative_body_on_multi_thread_runtime() {
        let registry = immediate();
        let (listener, hits) = cooperative_counter("sleeper");

        registry.subscribe("ping", &listener);
        registry.emit("ping", 1).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
