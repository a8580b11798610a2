//! Counting semaphore for blocking worker threads.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore: `acquire()` blocks until a permit is available and takes it,
/// `release()` returns a permit and wakes one waiter.
#[derive(Debug)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    permit_released: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            permit_released: Condvar::new(),
        }
    }

    /// Blocks the current thread until a permit is available, then takes it.
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "the loop guarantees at least one permit before decrementing"
    )]
    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock();

        while *permits == 0 {
            self.permit_released.wait(&mut permits);
        }

        *permits -= 1;
    }

    /// Takes a permit if one is available without blocking.
    #[cfg(test)]
    pub(crate) fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();

        if *permits == 0 {
            return false;
        }

        *permits = permits.saturating_sub(1);
        true
    }

    /// Returns a permit, waking one thread blocked in `acquire()`.
    pub(crate) fn release(&self) {
        {
            let mut permits = self.permits.lock();
            *permits = permits
                .checked_add(1)
                .expect("permit count cannot realistically overflow usize");
        }

        self.permit_released.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}
