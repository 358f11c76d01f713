//! Single-slot in-flight markers.
//!
//! A `SingleFlight` is a semaphore of capacity one. It guards the inference
//! call in the detection loop and the write path of the history synchronizer.
//! The permit is held by a `FlightGuard` and released when the guard drops, so
//! success, failure and unwinding all clear the slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the only permit, or `None` while another holder is in flight.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Permit for a `SingleFlight`. Dropping it frees the slot.
#[must_use = "the slot is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
