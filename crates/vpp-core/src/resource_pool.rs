//! Fixed-capacity per-consumer resource assignment.
//!
//! A consumer keeps the slot it was first given for the pool's lifetime, so a
//! decode session always submits on the same stream and appends to the same
//! dump file. Slots are never reclaimed; admitting more distinct consumers
//! than the pool holds is an explicit [`VppError::PoolExhausted`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{Result, VppError};

#[derive(Debug)]
struct Bindings {
    by_consumer: HashMap<String, usize>,
    owners: Vec<Option<String>>,
    free: VecDeque<usize>,
}

/// Pool of `capacity` resources bound lazily to consumer names.
///
/// The lock covers only lookup and binding; callers use the returned
/// resource without holding it.
#[derive(Debug)]
pub struct ResourcePool<T> {
    name: &'static str,
    resources: Vec<Arc<T>>,
    bindings: Mutex<Bindings>,
}

impl<T> ResourcePool<T> {
    /// Build a pool from pre-allocated resources. Capacity is `resources.len()`.
    pub fn new(name: &'static str, resources: Vec<T>) -> Self {
        let capacity = resources.len();
        Self {
            name,
            resources: resources.into_iter().map(Arc::new).collect(),
            bindings: Mutex::new(Bindings {
                by_consumer: HashMap::with_capacity(capacity),
                owners: vec![None; capacity],
                free: (0..capacity).collect(),
            }),
        }
    }

    /// Allocate `capacity` resources with `make(slot_index)`.
    pub fn try_with_capacity<F>(name: &'static str, capacity: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<T>,
    {
        let resources = (0..capacity).map(&mut make).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, resources))
    }

    /// Return the resource bound to `consumer`, binding the lowest free slot
    /// on first use.
    pub fn acquire(&self, consumer: &str) -> Result<Arc<T>> {
        let mut bindings = self.lock();
        if let Some(&slot) = bindings.by_consumer.get(consumer) {
            return Ok(Arc::clone(&self.resources[slot]));
        }

        let Some(slot) = bindings.free.pop_front() else {
            warn!(
                pool = self.name,
                capacity = self.resources.len(),
                consumer,
                "resource pool exhausted"
            );
            return Err(VppError::PoolExhausted {
                pool: self.name,
                capacity: self.resources.len(),
                consumer: consumer.to_string(),
            });
        };

        bindings.by_consumer.insert(consumer.to_string(), slot);
        bindings.owners[slot] = Some(consumer.to_string());
        debug!(pool = self.name, consumer, slot, "bound consumer to slot");
        Ok(Arc::clone(&self.resources[slot]))
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.resources.len()
    }

    /// Number of consumers currently bound.
    pub fn bound(&self) -> usize {
        self.lock().by_consumer.len()
    }

    /// Consumer bound to `slot`, if any.
    pub fn owner_of(&self, slot: usize) -> Option<String> {
        self.lock().owners.get(slot).cloned().flatten()
    }

    /// Slot index bound to `consumer`, if any.
    pub fn slot_of(&self, consumer: &str) -> Option<usize> {
        self.lock().by_consumer.get(consumer).copied()
    }

    /// Consume the pool and hand back its resources in slot order.
    pub fn into_resources(self) -> Vec<Arc<T>> {
        self.resources
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bindings> {
        // Bindings are updated atomically under the lock, so a poisoned guard
        // still holds a consistent map.
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
