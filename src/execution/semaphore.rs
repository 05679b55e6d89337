use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A small, blocking counting semaphore bounding the number of batches in flight.
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    /// `permits` must be non-zero; the engine validates this before building one.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// Acquire one permit, blocking until available.
    ///
    /// Returns the time spent waiting (zero if no wait was required) and a guard that releases
    /// the permit on drop, so a failing batch never leaks its permit.
    pub fn acquire(&self) -> (Duration, Permit<'_>) {
        let start = Instant::now();
        let mut waited = false;
        let mut g = self.lock();
        while *g == 0 {
            waited = true;
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        *g -= 1;
        let waited = if waited { start.elapsed() } else { Duration::ZERO };
        (waited, Permit { sem: self })
    }

    fn release(&self) {
        let mut g = self.lock();
        *g += 1;
        self.cv.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One acquired permit.
pub struct Permit<'a> {
    sem: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}
