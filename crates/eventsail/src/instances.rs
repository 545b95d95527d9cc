//! Identity cache for configured instances.
//!
//! Constructing the same type with an equal configuration twice yields the
//! same shared instance. The cache is explicit: callers may use the
//! process-wide [`InstanceRegistry::global`] or inject their own.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EmitterError, Result};

static GLOBAL_INSTANCES: LazyLock<InstanceRegistry> = LazyLock::new(InstanceRegistry::new);

/// A type that can be built from a hashable configuration value.
pub trait Configured: Sized + Send + Sync + 'static {
    type Config: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn construct(config: &Self::Config) -> Result<Self>;
}

/// Cached instances of one type.
struct Slot<T: Configured> {
    instances: HashMap<T::Config, Arc<T>>,
}

trait AnySlot: Send + Sync {
    fn len(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Configured> AnySlot for Slot<T> {
    fn len(&self) -> usize {
        self.instances.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Cache of shared instances keyed by type and configuration.
pub struct InstanceRegistry {
    slots: Mutex<HashMap<TypeId, Box<dyn AnySlot>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static InstanceRegistry {
        &GLOBAL_INSTANCES
    }

    /// Return the cached instance for `config`, constructing it on first use.
    ///
    /// The cache lock is held while constructing, so concurrent first calls
    /// with the same key construct exactly once. `T::construct` must not call
    /// back into this registry. A failed construction caches nothing.
    pub fn get_or_create<T: Configured>(&self, config: &T::Config) -> Result<Arc<T>> {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                Box::new(Slot::<T> {
                    instances: HashMap::new(),
                })
            })
            .as_any_mut()
            .downcast_mut::<Slot<T>>()
            .ok_or_else(|| {
                EmitterError::internal(format!(
                    "instance cache slot for {} has the wrong type",
                    type_name::<T>()
                ))
            })?;

        if let Some(existing) = slot.instances.get(config) {
            return Ok(Arc::clone(existing));
        }

        let created = Arc::new(T::construct(config)?);
        debug!(instance = type_name::<T>(), config = ?config, "Created shared instance");
        slot.instances.insert(config.clone(), Arc::clone(&created));
        Ok(created)
    }

    pub fn contains<T: Configured>(&self, config: &T::Config) -> bool {
        self.slots
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.as_any().downcast_ref::<Slot<T>>())
            .is_some_and(|slot| slot.instances.contains_key(config))
    }

    /// Number of cached instances across all types.
    pub fn len(&self) -> usize {
        self.slots.lock().values().map(|slot| slot.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached instance.
    ///
    /// Instances already handed out stay alive for as long as their holders
    /// keep them.
    pub fn reset(&self) {
        self.slots.lock().clear();
        debug!("Instance cache reset");
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("types", &self.slots.lock().len())
            .finish()
    }
}
