//! Concurrent service cache: one slot per service name, at most one
//! instantiation per slot
//!
//! `DashMap` gives atomic insert-if-absent for slot creation; each slot then
//! owns a mutex + condvar pair so exactly one thread instantiates a given
//! key while later arrivals either get the memoized result or block until
//! it is published.

use crate::core::error::Result;
use crate::core::locks::{lock_mutex, wait_condvar};
use crate::resolution::builder::ContainerService;
use crate::resolution::name::ServiceName;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

/// Outcome of trying to claim a slot for instantiation
pub enum AcquireResult {
    /// Caller claimed the slot and must release it on every exit path
    Acquired,
    /// Another thread already finished; use its sealed service
    AlreadyDone(Arc<ContainerService>),
}

struct SlotState {
    /// A thread currently holds the instantiate lock
    busy: bool,
    /// The memoized result is published
    instantiated: bool,
    service: Option<Arc<ContainerService>>,
}

/// One cache entry: instantiate lock plus the memoized sealed service
pub struct CacheSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                busy: false,
                instantiated: false,
                service: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Claim the slot, or learn that the result is already published.
    /// Blocks while another thread holds the claim.
    pub fn acquire_instantiate_lock(&self) -> Result<AcquireResult> {
        let mut state = lock_mutex(&self.state, "CacheSlot::acquire_instantiate_lock")?;
        loop {
            if state.instantiated {
                let service = state
                    .service
                    .clone()
                    .expect("instantiated slot always stores a service");
                return Ok(AcquireResult::AlreadyDone(service));
            }
            if !state.busy {
                state.busy = true;
                return Ok(AcquireResult::Acquired);
            }
            state = wait_condvar(&self.cond, state, "CacheSlot::acquire_instantiate_lock")?;
        }
    }

    /// Publish the sealed service and wake all waiters. Passing `None`
    /// (dependency-analysis mode) releases the claim without publishing, so
    /// a later real resolution can still instantiate.
    pub fn release_instantiate_lock(&self, service: Option<Arc<ContainerService>>) -> Result<()> {
        let mut state = lock_mutex(&self.state, "CacheSlot::release_instantiate_lock")?;
        state.busy = false;
        if let Some(service) = service {
            state.instantiated = true;
            state.service = Some(service);
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Block until the slot is instantiated; reports whether the published
    /// service resolved cleanly
    pub fn wait_for_resolve(&self) -> Result<Arc<ContainerService>> {
        let mut state = lock_mutex(&self.state, "CacheSlot::wait_for_resolve")?;
        while !state.instantiated {
            state = wait_condvar(&self.cond, state, "CacheSlot::wait_for_resolve")?;
        }
        Ok(state
            .service
            .clone()
            .expect("instantiated slot always stores a service"))
    }

    /// Published service, if any, without blocking
    pub fn try_get(&self) -> Result<Option<Arc<ContainerService>>> {
        let state = lock_mutex(&self.state, "CacheSlot::try_get")?;
        Ok(if state.instantiated {
            state.service.clone()
        } else {
            None
        })
    }
}

/// Container-wide cache `ServiceName → CacheSlot` plus the monotonic
/// top-sort counter stamped onto sealed services
pub struct ServiceCache {
    slots: DashMap<ServiceName, Arc<CacheSlot>>,
    top_sort: AtomicU64,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            top_sort: AtomicU64::new(0),
        }
    }

    /// Atomic insert-if-absent
    pub fn get_or_create(&self, name: &ServiceName) -> Arc<CacheSlot> {
        if let Some(slot) = self.slots.get(name) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .slots
            .entry(name.clone())
            .or_insert_with(|| {
                debug!(?name, "cache slot created");
                Arc::new(CacheSlot::new())
            });
        Arc::clone(slot.value())
    }

    /// Monotonic index stamped at seal; drives run and dispose ordering
    pub fn next_top_sort_index(&self) -> u64 {
        self.top_sort.fetch_add(1, Ordering::SeqCst)
    }

    /// Snapshot of every published service, for diagnostics
    pub fn resolved_services(&self) -> Vec<(ServiceName, Arc<ContainerService>)> {
        self.slots
            .iter()
            .filter_map(|entry| {
                let service = entry.value().try_get().ok().flatten()?;
                Some((entry.key().clone(), service))
            })
            .collect()
    }
}

impl Default for ServiceCache {
    fn default() -> Self {
        Self::new()
    }
}
