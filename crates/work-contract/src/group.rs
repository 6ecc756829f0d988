use crate::config::GroupConfig;
use crate::contract::{IntoWork, WorkContract, WorkContractToken};
use crate::error::CreateContractError;
use crate::invariants::{
    debug_assert_claim_exclusive, debug_assert_claim_scheduled, debug_assert_was_executing,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::release_token::ReleaseToken;
use crate::slot::{ReleaseFn, Slot, EXECUTE, RELEASE, SCHEDULE};
use crate::tree::SignalTree;
use crate::waiter::{Blocking, NonBlocking, WaitStrategy};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// =============================================================================
// CONTRACT STATE MACHINE
// =============================================================================
//
// Each slot's atomic byte carries three flags (SCHEDULE, EXECUTE, RELEASE)
// coordinating producers and the one worker inside the slot's EXECUTE window:
//
// - producer `schedule`:  prev = state |= SCHEDULE
// - producer `release`:   prev = state |= RELEASE | SCHEDULE
//   Either arms the signal tree only on the (SCHEDULE=0, EXECUTE=0) -> armed
//   transition; the tree set is the commit, so a slot enters the tree at most
//   once per quiescent-to-armed transition and double scheduling is impossible.
//
// - worker claim:         prev = state += EXECUTE - SCHEDULE
//   The tree handed this worker the slot's one pending unit, so SCHEDULE is
//   set and EXECUTE clear; the add consumes the schedule and opens the
//   EXECUTE window in one transition. RELEASE in `prev` diverts to the
//   release path.
//
// - worker un-claim:      prev = state -= EXECUTE
//   SCHEDULE still set means a request arrived during the window: re-arm the
//   tree exactly once. Any number of schedules inside one window coalesce
//   into that single follow-up execution.
//
// State RMWs are AcqRel: the claim acquires whatever the scheduling producer
// published before its fetch_or, and the un-claim releases the work
// function's writes to the next claimer.
// =============================================================================

/// Fixed-capacity scheduler of repeatable work contracts.
///
/// Producers hold [`WorkContract`] handles and call `schedule`; workers call
/// [`execute_next`](Self::execute_next) in a loop. Selection goes through a
/// counting signal tree: no shared head/tail pointer, O(log capacity) per
/// claim, per-thread bias spreading traversals across sub-trees.
///
/// The `W` parameter picks the wait strategy; see
/// [`BlockingWorkContractGroup`] for the variant that parks idle workers.
pub struct WorkContractGroup<W: WaitStrategy = NonBlocking> {
    inner: Arc<GroupInner<W>>,
}

/// Group variant whose `execute_next` sleeps while there is nothing to do.
pub type BlockingWorkContractGroup = WorkContractGroup<Blocking>;

pub(crate) struct GroupInner<W: WaitStrategy> {
    config: GroupConfig,
    /// Scheduled contracts: leaf set <=> a worker visit is owed.
    tree: SignalTree,
    /// Free slots: leaf set <=> the slot can be handed to `create_contract`.
    available: SignalTree,
    contracts: Box<[Slot<W>]>,
    release_tokens: Box<[Mutex<Option<Arc<ReleaseToken<W>>>>]>,
    waiter: W,
    stopped: AtomicBool,
    metrics: Metrics,
}

impl WorkContractGroup {
    /// Creates a non-blocking group for at least `capacity` concurrent
    /// contracts (rounded up to the smallest supported power of two).
    pub fn new(capacity: u64) -> Self {
        Self::with_config(GroupConfig::new(capacity))
    }

    /// Creates a blocking group: its workers sleep on an empty tree instead
    /// of returning immediately.
    pub fn new_blocking(capacity: u64) -> BlockingWorkContractGroup {
        BlockingWorkContractGroup::with_config(GroupConfig::new(capacity))
    }
}

impl<W: WaitStrategy> WorkContractGroup<W> {
    /// Creates a group from an explicit configuration. The wait strategy is
    /// taken from the annotated type, e.g.
    /// `BlockingWorkContractGroup::with_config(..)`.
    pub fn with_config(config: GroupConfig) -> Self {
        let capacity = config.capacity();
        let sub_trees = config.sub_trees();

        let mut contracts = Vec::with_capacity(capacity as usize);
        contracts.resize_with(capacity as usize, Slot::vacant);
        let mut release_tokens = Vec::with_capacity(capacity as usize);
        release_tokens.resize_with(capacity as usize, || Mutex::new(None));

        Self {
            inner: Arc::new(GroupInner {
                config,
                tree: SignalTree::new(capacity, sub_trees),
                available: SignalTree::new_full(capacity, sub_trees),
                contracts: contracts.into_boxed_slice(),
                release_tokens: release_tokens.into_boxed_slice(),
                waiter: W::default(),
                stopped: AtomicBool::new(false),
                metrics: Metrics::new(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // CONTRACT CREATION
    // ---------------------------------------------------------------------

    /// Creates a contract, initially unscheduled. Returns `None` when the
    /// group is full or stopped; use
    /// [`try_create_contract`](Self::try_create_contract) to tell the two
    /// apart.
    ///
    /// `work` may take no arguments or a `&mut WorkContractToken` for
    /// self-rescheduling from inside the body.
    pub fn create_contract<M>(&self, work: impl IntoWork<W, M>) -> Option<WorkContract<W>> {
        self.try_create_contract(work).ok()
    }

    /// Creates a contract with a release callback that runs exactly once
    /// when the contract is torn down.
    pub fn create_contract_with_release<M>(
        &self,
        work: impl IntoWork<W, M>,
        release: impl FnOnce() + Send + 'static,
    ) -> Option<WorkContract<W>> {
        self.create(work.into_work(), Some(Box::new(release)), false)
            .ok()
    }

    /// Creates a contract that is already scheduled for its first execution.
    pub fn create_scheduled_contract<M>(
        &self,
        work: impl IntoWork<W, M>,
    ) -> Option<WorkContract<W>> {
        self.create(work.into_work(), None, true).ok()
    }

    /// Creates an already-scheduled contract with a release callback.
    pub fn create_scheduled_contract_with_release<M>(
        &self,
        work: impl IntoWork<W, M>,
        release: impl FnOnce() + Send + 'static,
    ) -> Option<WorkContract<W>> {
        self.create(work.into_work(), Some(Box::new(release)), true)
            .ok()
    }

    /// Error-typed creation: distinguishes a full group from a stopped one.
    pub fn try_create_contract<M>(
        &self,
        work: impl IntoWork<W, M>,
    ) -> Result<WorkContract<W>, CreateContractError> {
        self.create(work.into_work(), None, false)
    }

    fn create(
        &self,
        work: crate::contract::WorkFn<W>,
        release: Option<ReleaseFn>,
        scheduled: bool,
    ) -> Result<WorkContract<W>, CreateContractError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(CreateContractError::Stopped);
        }
        let Some(id) = inner.available.select_balanced(next_bias()) else {
            return Err(CreateContractError::CapacityExhausted {
                capacity: inner.config.capacity(),
            });
        };

        let slot = &inner.contracts[id as usize];
        debug_assert_eq!(slot.state.load(Ordering::Relaxed), 0);
        slot.state.store(0, Ordering::Relaxed);
        // SAFETY: the slot was just reserved out of the availability tree and
        // its handle does not exist yet; this thread is the only one touching
        // the closure cells.
        unsafe {
            *slot.work.get() = Some(work);
            *slot.release.get() = release;
        }

        let token = Arc::new(ReleaseToken::new(Arc::downgrade(inner)));
        *inner.release_tokens[id as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&token));

        if inner.config.enable_metrics() {
            inner.metrics.add_contract_created();
        }

        let contract = WorkContract {
            group: Arc::downgrade(inner),
            token,
            id,
            released: false,
        };
        if scheduled {
            inner.schedule(id);
        }
        Ok(contract)
    }

    // ---------------------------------------------------------------------
    // EXECUTION
    // ---------------------------------------------------------------------

    /// Selects one scheduled contract and executes it.
    ///
    /// Returns `false` when nothing was executed: the tree was empty
    /// (after the wait, in blocking mode) or the group has stopped. Workers
    /// call this in a loop.
    pub fn execute_next(&self) -> bool {
        let inner = &*self.inner;
        inner
            .waiter
            .wait(|| !inner.tree.is_empty() || inner.stopped.load(Ordering::Acquire));
        if inner.stopped.load(Ordering::Acquire) {
            return false;
        }
        inner.try_execute()
    }

    /// Stops the group: orphans every live release token (outstanding
    /// handles become inert) and wakes all sleeping workers. In-flight
    /// executions complete; idempotent.
    pub fn stop(&self) {
        let inner = &*self.inner;
        if inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in &inner.release_tokens {
            let token = entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(token) = token {
                token.orphan();
            }
        }
        inner.waiter.notify_all();
    }

    // ---------------------------------------------------------------------
    // OBSERVATION
    // ---------------------------------------------------------------------

    /// The fixed slot capacity.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.inner.config.capacity()
    }

    /// Number of live contracts (advisory under concurrency).
    pub fn active_contract_count(&self) -> u64 {
        self.inner.config.capacity() - self.inner.available.count()
    }

    /// Whether `stop` has been called.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Snapshot of the group's metrics; all-zero unless the group was
    /// configured with metrics enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.inner.config.enable_metrics() {
            self.inner.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl WorkContractGroup<Blocking> {
    /// Like [`execute_next`](Self::execute_next), but the wait for work is
    /// bounded. Returns `false` on timeout with no side effect.
    pub fn execute_next_for(&self, timeout: Duration) -> bool {
        let inner = &*self.inner;
        let woke = inner.waiter.wait_timeout(timeout, || {
            !inner.tree.is_empty() || inner.stopped.load(Ordering::Acquire)
        });
        if !woke || inner.stopped.load(Ordering::Acquire) {
            return false;
        }
        inner.try_execute()
    }
}

impl<W: WaitStrategy> GroupInner<W> {
    /// Producer transition: deposit a schedule request, arming the tree on
    /// the quiescent-to-armed edge.
    pub(crate) fn schedule(&self, id: u64) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let prev = self.contracts[id as usize]
            .state
            .fetch_or(SCHEDULE, Ordering::AcqRel);
        if prev & (SCHEDULE | EXECUTE) == 0 {
            self.signal(id);
        }
    }

    /// Release transition: RELEASE is sticky and always rides with SCHEDULE
    /// so exactly one worker visit observes it.
    pub(crate) fn release(&self, id: u64) {
        let prev = self.contracts[id as usize]
            .state
            .fetch_or(RELEASE | SCHEDULE, Ordering::AcqRel);
        if prev & (SCHEDULE | EXECUTE) == 0 {
            self.signal(id);
        }
    }

    fn signal(&self, id: u64) {
        if self.tree.set(id) {
            self.waiter.notify_one();
        }
    }

    fn try_execute(&self) -> bool {
        match self.tree.select(next_bias()) {
            Some(id) => {
                self.process(id);
                true
            }
            None => {
                if self.config.enable_metrics() {
                    self.metrics.add_empty_select();
                }
                false
            }
        }
    }

    fn process(&self, id: u64) {
        let slot = &self.contracts[id as usize];
        let prev = slot.state.fetch_add(EXECUTE - SCHEDULE, Ordering::AcqRel);
        debug_assert_claim_scheduled!(prev, SCHEDULE);
        debug_assert_claim_exclusive!(prev, EXECUTE);

        if prev & RELEASE != 0 {
            self.process_release(id);
            return;
        }

        if self.config.enable_metrics() {
            self.metrics.add_execution();
        }

        // The un-claim transition must run even if the work function panics,
        // or the slot would be stuck outside the tree with EXECUTE set.
        let guard = ExecuteGuard { group: self, id };
        let mut token = WorkContractToken { group: self, id };
        // SAFETY: this worker holds the EXECUTE flag; no other thread touches
        // the closure cells until the guard clears it.
        let work = unsafe { &mut *slot.work.get() };
        debug_assert!(work.is_some(), "executing a vacant slot");
        if let Some(work) = work.as_mut() {
            work(&mut token);
        }
        drop(guard);
    }

    /// Tears the contract down: runs the release callback and returns the
    /// slot to the availability tree.
    fn process_release(&self, id: u64) {
        if self.config.enable_metrics() {
            self.metrics.add_release_execution();
        }
        let slot = &self.contracts[id as usize];
        // SAFETY: this worker holds the EXECUTE flag.
        let (work, release) = unsafe { ((*slot.work.get()).take(), (*slot.release.get()).take()) };
        // The work function and its captures go first, before the release
        // callback observes the world.
        drop(work);

        // The slot must return to the pool even if the callback panics.
        let guard = ReleaseGuard { group: self, id };
        if let Some(release) = release {
            release();
        }
        drop(guard);
    }
}

/// Runs the worker's un-claim transition on drop, including during unwind.
struct ExecuteGuard<'a, W: WaitStrategy> {
    group: &'a GroupInner<W>,
    id: u64,
}

impl<W: WaitStrategy> Drop for ExecuteGuard<'_, W> {
    fn drop(&mut self) {
        let prev = self.group.contracts[self.id as usize]
            .state
            .fetch_sub(EXECUTE, Ordering::AcqRel);
        debug_assert_was_executing!(prev, EXECUTE);
        if prev & SCHEDULE != 0 {
            self.group.signal(self.id);
        }
    }
}

/// Completes slot teardown on drop, including during unwind.
struct ReleaseGuard<'a, W: WaitStrategy> {
    group: &'a GroupInner<W>,
    id: u64,
}

impl<W: WaitStrategy> Drop for ReleaseGuard<'_, W> {
    fn drop(&mut self) {
        let group = self.group;
        let id = self.id as usize;
        // Drop the group's token reference; a still-living handle keeps the
        // (already consumed) token alive but can no longer reach this slot.
        *group.release_tokens[id]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        group.contracts[id].state.store(0, Ordering::Release);
        group.available.set(self.id);
        if group.config.enable_metrics() {
            group.metrics.add_contract_released();
        }
    }
}

/// Per-thread traversal bias: seeded far apart per thread, Weyl-stepped per
/// call so every level of the descent sees fresh hint bits.
fn next_bias() -> u64 {
    const WEYL: u64 = 0x9e37_79b9_7f4a_7c15;
    static SEED: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static BIAS: Cell<u64> =
            Cell::new(SEED.fetch_add(1, Ordering::Relaxed).wrapping_mul(WEYL));
    }
    BIAS.with(|bias| {
        let value = bias.get();
        bias.set(value.wrapping_add(WEYL));
        value
    })
}
