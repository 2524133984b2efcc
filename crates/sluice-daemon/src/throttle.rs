//! Admission throttle for protocol requests
//!
//! Bounds how many units of work are in flight at once. Callers block in
//! `acquire` until a slot frees up and hold the returned [`Permit`] for the
//! duration of the work; dropping it frees the slot and wakes one waiter.
//!
//! `shutdown` aborts every wait with `Interrupted`. Callers treat that as a
//! hard failure, not something to retry.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use sluice_core::{FsError, FsResult};

use crate::pipe::WAIT_TICK;

#[derive(Debug)]
struct ThrottleState {
    in_flight: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<ThrottleState>,
    released: Condvar,
    capacity: usize,
}

impl Shared {
    fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        trace!(in_flight = state.in_flight, "permit released");
        self.released.notify_one();
    }
}

/// Counting admission gate; clones share the same slots
#[derive(Clone)]
pub struct AdmissionThrottle {
    shared: Arc<Shared>,
}

impl AdmissionThrottle {
    /// Allow at most `capacity` (at least one) concurrent permits
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ThrottleState {
                    in_flight: 0,
                    shutdown: false,
                }),
                released: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Block until a slot is free
    pub fn acquire(&self) -> FsResult<Permit> {
        let mut state = self.shared.state.lock();
        while state.in_flight >= self.shared.capacity && !state.shutdown {
            self.shared.released.wait_for(&mut state, WAIT_TICK);
        }
        if state.shutdown {
            return Err(FsError::interrupted("admission throttle shut down"));
        }
        state.in_flight += 1;
        trace!(in_flight = state.in_flight, "permit acquired");
        Ok(Permit {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.in_flight >= self.shared.capacity {
            return None;
        }
        state.in_flight += 1;
        Some(Permit {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Fail all current and future waits with `Interrupted`
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            debug!(in_flight = state.in_flight, "admission throttle shut down");
        }
        self.shared.released.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

impl std::fmt::Debug for AdmissionThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionThrottle")
            .field("capacity", &self.shared.capacity)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

/// One admitted unit of work; the slot is freed on drop
pub struct Permit {
    shared: Arc<Shared>,
}

impl Permit {
    /// Free the slot now
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.shared.release();
    }
}
