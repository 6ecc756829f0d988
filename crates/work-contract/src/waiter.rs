//! Wait strategies for the two group variants.
//!
//! The non-blocking and blocking groups share one implementation,
//! parameterized over the strategy instead of duplicating the whole tree.
//! [`NonBlocking`] is zero-sized and compiles the wait protocol away;
//! [`Blocking`] carries the mutex + condvar pair guarding the
//! "scheduled tree became non-empty, or the group stopped" predicate.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::NonBlocking {}
    impl Sealed for super::Blocking {}
}

/// Capability the group uses to park workers while the tree is empty.
///
/// Sealed: the two implementations below cover the supported modes.
pub trait WaitStrategy: sealed::Sealed + Default + Send + Sync + 'static {
    /// Blocks until `ready()` observes true. Returns immediately for the
    /// non-blocking strategy.
    fn wait(&self, ready: impl Fn() -> bool);

    /// Bounded wait. Returns the final observation of `ready()`; `false`
    /// means the timeout elapsed first.
    fn wait_timeout(&self, timeout: Duration, ready: impl Fn() -> bool) -> bool;

    /// Wakes one parked worker. Called after a set that armed an empty tree.
    fn notify_one(&self);

    /// Wakes every parked worker. Called by `stop`.
    fn notify_all(&self);
}

/// Spin-style variant: `execute_next` returns immediately when there is
/// nothing to do. For low-latency callers that keep their own loop.
#[derive(Debug, Default)]
pub struct NonBlocking;

impl WaitStrategy for NonBlocking {
    #[inline]
    fn wait(&self, _ready: impl Fn() -> bool) {}

    #[inline]
    fn wait_timeout(&self, _timeout: Duration, ready: impl Fn() -> bool) -> bool {
        ready()
    }

    #[inline]
    fn notify_one(&self) {}

    #[inline]
    fn notify_all(&self) {}
}

/// Condvar-backed variant: workers sleep while the tree is empty.
///
/// Notifications take the mutex. The predicate is re-checked under the lock
/// before every park, so a set landing between the caller's empty observation
/// and its park cannot be lost.
#[derive(Debug, Default)]
pub struct Blocking {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WaitStrategy for Blocking {
    fn wait(&self, ready: impl Fn() -> bool) {
        if ready() {
            return;
        }
        let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        while !ready() {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_timeout(&self, timeout: Duration, ready: impl Fn() -> bool) -> bool {
        if ready() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        while !ready() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                return ready();
            };
            let (reacquired, result) = self
                .condvar
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = reacquired;
            if result.timed_out() {
                return ready();
            }
        }
        true
    }

    fn notify_one(&self) {
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_all();
    }
}
