use std::sync::{MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[cfg(not(target_arch = "wasm32"))]
pub(crate) use std::sync::{Condvar, Mutex};
#[cfg(target_arch = "wasm32")]
pub(crate) use wasm_sync::{Condvar, Mutex};

/// Locks `mutex`, ignoring poisoning. Every value guarded in this crate is
/// consistent at each unlock point, so a panic elsewhere never leaves it torn.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct CondMutex<T> {
    pub condvar: Condvar,
    pub mutex: Mutex<T>,
}

impl<T> CondMutex<T> {
    pub fn new(data: T) -> Self {
        Self { mutex: Mutex::new(data), condvar: Condvar::default() }
    }
}

/// An auto-reset event.
///
/// A call to [`trigger`](Event::trigger) releases exactly one waiter. If nobody
/// is waiting the event stays signalled and the next wait returns at once, so
/// a trigger can never be missed by a thread that is about to block.
#[derive(Default)]
pub struct Event {
    state: CondMutex<bool>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut signalled = lock(&self.state.mutex);
        *signalled = true;
        drop(signalled);
        self.state.condvar.notify_one();
    }

    /// Blocks until the event is triggered, then resets it.
    pub fn wait(&self) {
        let mut signalled = lock(&self.state.mutex);
        while !*signalled {
            signalled = self.state.condvar.wait(signalled).unwrap_or_else(PoisonError::into_inner);
        }
        *signalled = false;
    }

    /// Like [`wait`](Event::wait), but gives up after `timeout`. Returns
    /// whether the event was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = lock(&self.state.mutex);
        while !*signalled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            signalled = self.state.condvar
                .wait_timeout(signalled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *signalled = false;
        true
    }

    /// Clears a pending trigger without waiting.
    pub fn reset(&self) {
        *lock(&self.state.mutex) = false;
    }
}
