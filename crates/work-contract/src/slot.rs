use crate::contract::WorkFn;
use crate::waiter::WaitStrategy;
use std::cell::UnsafeCell;
use std::sync::atomic::AtomicU8;

/// Boxed release function; runs exactly once when the contract is torn down.
pub(crate) type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A schedule request is pending.
pub(crate) const SCHEDULE: u8 = 0b001;
/// A worker is inside the work (or release) function.
pub(crate) const EXECUTE: u8 = 0b010;
/// Release has been requested; sticky until the slot is torn down.
pub(crate) const RELEASE: u8 = 0b100;

/// One contract slot: the state byte that producers and the executing worker
/// synchronize on, plus the stored callbacks.
///
/// The closure cells are deliberately not atomic. Exclusive access follows
/// from the state machine:
/// - between `create_contract` reserving the slot from the availability tree
///   and the handle being returned, only the creating thread touches them;
/// - afterwards, only the worker holding the EXECUTE flag does (the signal
///   tree hands a scheduled slot to exactly one selector, and the claim
///   transition asserts EXECUTE was clear).
pub(crate) struct Slot<W: WaitStrategy> {
    pub(crate) state: AtomicU8,
    pub(crate) work: UnsafeCell<Option<WorkFn<W>>>,
    pub(crate) release: UnsafeCell<Option<ReleaseFn>>,
}

// SAFETY: the UnsafeCell fields are accessed under the exclusivity protocol
// documented on the struct; the state byte is atomic. The stored closures are
// required to be Send, so handing the cell contents from the creating thread
// to an executing worker is sound.
unsafe impl<W: WaitStrategy> Sync for Slot<W> {}
unsafe impl<W: WaitStrategy> Send for Slot<W> {}

impl<W: WaitStrategy> Slot<W> {
    pub(crate) fn vacant() -> Self {
        Self {
            state: AtomicU8::new(0),
            work: UnsafeCell::new(None),
            release: UnsafeCell::new(None),
        }
    }
}
