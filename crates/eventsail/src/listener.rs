//! Listener targets and the non-owning handles the registry stores.
//!
//! The registry never owns a subscriber. Callers keep the strong side of a
//! listener (a [`Listener`] value or the `Arc` owning a bound method) and the
//! registry keeps a [`Weak`]. Once the caller drops the last strong
//! reference, the handle resolves as expired and is pruned on the next emit.
//!
//! Every target carries a capability tag chosen at construction time: an
//! ordinary blocking callable, or a cooperative task body returning a future.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::ListenerResult;

/// Boxed blocking listener body.
pub type BlockingFn<A> = dyn Fn(A) -> ListenerResult + Send + Sync;

/// Boxed cooperative listener body.
pub type CooperativeFn<A> = dyn Fn(A) -> BoxFuture<'static, ListenerResult> + Send + Sync;

static NEXT_ONCE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Identity
// ============================================================================

/// Identity of a registered handle.
///
/// Addresses are taken from the target's allocation. The registry's `Weak`
/// keeps that allocation reserved, so an address cannot be handed to a new
/// target while a handle for the old one is still registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerKey {
    /// A free function or closure wrapped in a [`Listener`].
    Plain(usize),
    /// A named method bound to an owner object.
    Bound { owner: usize, method: Arc<str> },
    /// A synthetic once-wrapper.
    Once(u64),
}

// ============================================================================
// Plain listeners
// ============================================================================

enum Body<A> {
    Blocking(Arc<BlockingFn<A>>),
    Cooperative(Arc<CooperativeFn<A>>),
}

struct ListenerInner<A> {
    name: Arc<str>,
    body: Body<A>,
}

/// A free function or closure that can be subscribed to events.
///
/// The value returned by [`Listener::blocking`] or [`Listener::cooperative`]
/// is the strong owner of the callable. Clones share identity, so
/// subscribing any clone twice still registers a single handle. Dropping
/// every clone expires the subscription.
///
/// # Example
///
/// ```
/// use eventsail::{DispatchMode, Listener, ListenerRegistry};
///
/// let registry = ListenerRegistry::<u32>::builder(DispatchMode::Immediate).build().unwrap();
/// let audit = Listener::blocking("audit", |value: u32| {
///     println!("got {value}");
///     Ok(())
/// });
///
/// registry.subscribe("tick", &audit);
/// registry.emit("tick", 7).unwrap();
/// ```
pub struct Listener<A> {
    inner: Arc<ListenerInner<A>>,
}

impl<A: Send + 'static> Listener<A> {
    /// Create a listener that runs as an ordinary blocking call.
    pub fn blocking<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(A) -> ListenerResult + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ListenerInner {
                name: name.into(),
                body: Body::Blocking(Arc::new(f)),
            }),
        }
    }

    /// Create a listener whose body is a cooperative task.
    pub fn cooperative<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        Self {
            inner: Arc::new(ListenerInner {
                name: name.into(),
                body: Body::Cooperative(Arc::new(move |args| f(args).boxed())),
            }),
        }
    }

    /// Listener name, used in diagnostics and task tags.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the body is a cooperative task.
    pub fn is_cooperative(&self) -> bool {
        matches!(self.inner.body, Body::Cooperative(_))
    }

    /// Identity used for subscription de-duplication.
    pub fn key(&self) -> ListenerKey {
        ListenerKey::Plain(Arc::as_ptr(&self.inner) as *const () as usize)
    }
}

impl<A> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> PartialEq for Listener<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A> Eq for Listener<A> {}

impl<A> fmt::Debug for Listener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner.body {
            Body::Blocking(_) => "blocking",
            Body::Cooperative(_) => "cooperative",
        };
        f.debug_struct("Listener")
            .field("name", &self.inner.name)
            .field("kind", &kind)
            .finish()
    }
}

// ============================================================================
// Resolved listeners
// ============================================================================

/// How a resolved listener is run.
pub enum Invocation<A> {
    /// Call directly; the result is available when the call returns.
    Blocking(Box<dyn FnOnce(A) -> ListenerResult + Send>),
    /// Produce a future that must be driven by an executor.
    Cooperative(Box<dyn FnOnce(A) -> BoxFuture<'static, ListenerResult> + Send>),
}

/// A listener whose target was alive at resolution time.
///
/// Holds a strong reference to the target until it is invoked, so the target
/// cannot disappear between resolution and dispatch.
pub struct ResolvedListener<A> {
    name: Arc<str>,
    invocation: Invocation<A>,
}

impl<A> ResolvedListener<A> {
    pub fn new(name: Arc<str>, invocation: Invocation<A>) -> Self {
        Self { name, invocation }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn is_cooperative(&self) -> bool {
        matches!(self.invocation, Invocation::Cooperative(_))
    }

    pub fn into_parts(self) -> (Arc<str>, Invocation<A>) {
        (self.name, self.invocation)
    }
}

impl<A> fmt::Debug for ResolvedListener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedListener")
            .field("name", &self.name)
            .field("cooperative", &self.is_cooperative())
            .finish()
    }
}

/// Outcome of resolving a handle during emit.
#[derive(Debug)]
pub enum Resolution<A> {
    /// Target is alive; dispatch it.
    Live(ResolvedListener<A>),
    /// A once-wrapper was claimed by this resolution; remove it, then dispatch.
    Claimed(ResolvedListener<A>),
    /// A once-wrapper already claimed by another emit.
    Spent,
    /// The target's owner is gone.
    Expired,
}

// ============================================================================
// Weak targets
// ============================================================================

trait WeakTarget<A>: Send + Sync {
    fn name(&self) -> &Arc<str>;

    fn is_cooperative(&self) -> bool;

    fn upgrade(&self) -> Option<ResolvedListener<A>>;
}

struct PlainTarget<A> {
    name: Arc<str>,
    cooperative: bool,
    listener: Weak<ListenerInner<A>>,
}

impl<A: Send + 'static> WeakTarget<A> for PlainTarget<A> {
    fn name(&self) -> &Arc<str> {
        &self.name
    }

    fn is_cooperative(&self) -> bool {
        self.cooperative
    }

    fn upgrade(&self) -> Option<ResolvedListener<A>> {
        let inner = self.listener.upgrade()?;
        let invocation = match &inner.body {
            Body::Blocking(f) => {
                let f = Arc::clone(f);
                Invocation::Blocking(Box::new(move |args| f(args)))
            }
            Body::Cooperative(f) => {
                let f = Arc::clone(f);
                Invocation::Cooperative(Box::new(move |args| f(args)))
            }
        };
        Some(ResolvedListener::new(self.name.clone(), invocation))
    }
}

struct BoundBlocking<T, M> {
    name: Arc<str>,
    owner: Weak<T>,
    method: Arc<M>,
}

impl<T, M, A> WeakTarget<A> for BoundBlocking<T, M>
where
    T: Send + Sync + 'static,
    M: Fn(&T, A) -> ListenerResult + Send + Sync + 'static,
    A: Send + 'static,
{
    fn name(&self) -> &Arc<str> {
        &self.name
    }

    fn is_cooperative(&self) -> bool {
        false
    }

    fn upgrade(&self) -> Option<ResolvedListener<A>> {
        let owner = self.owner.upgrade()?;
        let method = Arc::clone(&self.method);
        Some(ResolvedListener::new(
            self.name.clone(),
            Invocation::Blocking(Box::new(move |args| method(&owner, args))),
        ))
    }
}

struct BoundCooperative<T, M> {
    name: Arc<str>,
    owner: Weak<T>,
    method: Arc<M>,
}

impl<T, M, Fut, A> WeakTarget<A> for BoundCooperative<T, M>
where
    T: Send + Sync + 'static,
    M: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ListenerResult> + Send + 'static,
    A: Send + 'static,
{
    fn name(&self) -> &Arc<str> {
        &self.name
    }

    fn is_cooperative(&self) -> bool {
        true
    }

    fn upgrade(&self) -> Option<ResolvedListener<A>> {
        let owner = self.owner.upgrade()?;
        let method = Arc::clone(&self.method);
        Some(ResolvedListener::new(
            self.name.clone(),
            Invocation::Cooperative(Box::new(move |args| method(owner, args).boxed())),
        ))
    }
}

struct OnceState<A> {
    target: Arc<dyn WeakTarget<A>>,
    target_key: ListenerKey,
    fired: AtomicBool,
}

// ============================================================================
// Handles
// ============================================================================

enum HandleKind<A> {
    Target(Arc<dyn WeakTarget<A>>),
    Once(Arc<OnceState<A>>),
}

impl<A> Clone for HandleKind<A> {
    fn clone(&self) -> Self {
        match self {
            HandleKind::Target(target) => HandleKind::Target(Arc::clone(target)),
            HandleKind::Once(state) => HandleKind::Once(Arc::clone(state)),
        }
    }
}

/// Non-owning reference to a subscribed target.
///
/// Build one from a [`Listener`] (`(&listener).into()`), or bind a method to
/// an owner with [`ListenerHandle::bound`] and
/// [`ListenerHandle::bound_cooperative`]. Subscribing and unsubscribing both
/// accept anything convertible into a handle; matching is done by
/// [`ListenerKey`].
pub struct ListenerHandle<A> {
    key: ListenerKey,
    kind: HandleKind<A>,
}

impl<A: Send + 'static> ListenerHandle<A> {
    /// Bind a blocking method to `owner` without extending its lifetime.
    ///
    /// `method` is the method's identity on that owner: binding the same
    /// owner and name twice yields equal keys.
    pub fn bound<T, M>(owner: &Arc<T>, method: &str, f: M) -> Self
    where
        T: Send + Sync + 'static,
        M: Fn(&T, A) -> ListenerResult + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(method);
        Self {
            key: bound_key(owner, &name),
            kind: HandleKind::Target(Arc::new(BoundBlocking {
                name,
                owner: Arc::downgrade(owner),
                method: Arc::new(f),
            })),
        }
    }

    /// Bind a cooperative method to `owner` without extending its lifetime.
    pub fn bound_cooperative<T, M, Fut>(owner: &Arc<T>, method: &str, f: M) -> Self
    where
        T: Send + Sync + 'static,
        M: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(method);
        Self {
            key: bound_key(owner, &name),
            kind: HandleKind::Target(Arc::new(BoundCooperative {
                name,
                owner: Arc::downgrade(owner),
                method: Arc::new(f),
            })),
        }
    }

    /// Wrap `target` so that it runs at most once.
    ///
    /// The wrapper gets a fresh identity; wrapping the same target twice
    /// registers two independent once-listeners.
    pub fn once(target: ListenerHandle<A>) -> Self {
        let (target, target_key) = match target.kind {
            HandleKind::Target(inner) => (inner, target.key),
            HandleKind::Once(state) => (Arc::clone(&state.target), state.target_key.clone()),
        };
        Self {
            key: ListenerKey::Once(NEXT_ONCE_ID.fetch_add(1, Ordering::Relaxed)),
            kind: HandleKind::Once(Arc::new(OnceState {
                target,
                target_key,
                fired: AtomicBool::new(false),
            })),
        }
    }

    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            HandleKind::Target(target) => target.name(),
            HandleKind::Once(state) => state.target.name(),
        }
    }

    /// Whether the target's body is a cooperative task.
    ///
    /// Known without resolving, so it neither upgrades nor claims the target.
    pub fn is_cooperative(&self) -> bool {
        match &self.kind {
            HandleKind::Target(target) => target.is_cooperative(),
            HandleKind::Once(state) => state.target.is_cooperative(),
        }
    }

    /// Key of the wrapped target when this handle is a once-wrapper.
    pub fn wrapped_key(&self) -> Option<&ListenerKey> {
        match &self.kind {
            HandleKind::Target(_) => None,
            HandleKind::Once(state) => Some(&state.target_key),
        }
    }

    /// Resolve the target for a single dispatch.
    pub fn resolve(&self) -> Resolution<A> {
        match &self.kind {
            HandleKind::Target(target) => match target.upgrade() {
                Some(listener) => Resolution::Live(listener),
                None => Resolution::Expired,
            },
            HandleKind::Once(state) => {
                if state.fired.load(Ordering::Acquire) {
                    return Resolution::Spent;
                }
                let Some(listener) = state.target.upgrade() else {
                    return Resolution::Expired;
                };
                match state
                    .fired
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => Resolution::Claimed(listener),
                    Err(_) => Resolution::Spent,
                }
            }
        }
    }
}

fn bound_key<T>(owner: &Arc<T>, method: &Arc<str>) -> ListenerKey {
    ListenerKey::Bound {
        owner: Arc::as_ptr(owner) as *const () as usize,
        method: Arc::clone(method),
    }
}

impl<A: Send + 'static> From<&Listener<A>> for ListenerHandle<A> {
    fn from(listener: &Listener<A>) -> Self {
        Self {
            key: listener.key(),
            kind: HandleKind::Target(Arc::new(PlainTarget {
                name: listener.inner.name.clone(),
                cooperative: listener.is_cooperative(),
                listener: Arc::downgrade(&listener.inner),
            })),
        }
    }
}

impl<A> Clone for ListenerHandle<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl<A> fmt::Debug for ListenerHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
