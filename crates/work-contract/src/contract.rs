use crate::group::GroupInner;
use crate::release_token::ReleaseToken;
use crate::waiter::{NonBlocking, WaitStrategy};
use std::sync::{Arc, Weak};

/// Boxed work function as stored in a contract slot.
pub type WorkFn<W = NonBlocking> = Box<dyn FnMut(&mut WorkContractToken<'_, W>) + Send>;

/// Owning handle for one contract within a group.
///
/// Movable, non-copyable. Dropping the handle requests release of the
/// contract: the next worker visit runs the release callback (if any) and
/// returns the slot to the pool.
pub struct WorkContract<W: WaitStrategy = NonBlocking> {
    pub(crate) group: Weak<GroupInner<W>>,
    pub(crate) token: Arc<ReleaseToken<W>>,
    pub(crate) id: u64,
    pub(crate) released: bool,
}

impl<W: WaitStrategy> WorkContract<W> {
    /// Requests one execution of the work function.
    ///
    /// Requests arriving while an execution is in flight coalesce into a
    /// single follow-up execution. A no-op once the group has stopped or the
    /// handle has been released.
    pub fn schedule(&self) {
        if self.released {
            debug_assert!(false, "schedule on a released work contract");
            return;
        }
        if let Some(group) = self.group.upgrade() {
            group.schedule(self.id);
        }
    }

    /// Requests release of the contract. Returns `true` if this call was the
    /// one that reached the group; further `schedule`/`release` on this
    /// handle are no-ops.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.token.schedule_release(self.id)
    }

    /// Whether the contract can still reach its group (not released, group
    /// neither stopped nor dropped).
    pub fn is_valid(&self) -> bool {
        !self.released && self.token.is_valid()
    }

    /// The slot id this contract occupies within its group.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<W: WaitStrategy> Drop for WorkContract<W> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.token.schedule_release(self.id);
        }
    }
}

/// Self-reschedule token passed to the work function.
///
/// `schedule()` is equivalent to `WorkContract::schedule` for the executing
/// slot; it lets the work function arm its next execution without capturing
/// its own handle.
pub struct WorkContractToken<'a, W: WaitStrategy> {
    pub(crate) group: &'a GroupInner<W>,
    pub(crate) id: u64,
}

impl<W: WaitStrategy> WorkContractToken<'_, W> {
    /// Requests another execution of the contract being executed.
    pub fn schedule(&mut self) {
        self.group.schedule(self.id);
    }

    /// The slot id of the contract being executed.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Marker for work functions of the shape `FnMut()`.
pub enum PlainWork {}

/// Marker for work functions of the shape `FnMut(&mut WorkContractToken)`.
pub enum TokenWork {}

/// Conversion accepting both supported work-function shapes.
///
/// `create_contract` takes any `FnMut() + Send` or
/// `FnMut(&mut WorkContractToken) + Send`; the marker parameter lets type
/// inference pick the matching impl from the closure's signature.
pub trait IntoWork<W: WaitStrategy, Marker>: Send + 'static {
    /// Boxes the closure into the stored work-function shape.
    fn into_work(self) -> WorkFn<W>;
}

impl<W, F> IntoWork<W, PlainWork> for F
where
    W: WaitStrategy,
    F: FnMut() + Send + 'static,
{
    fn into_work(mut self) -> WorkFn<W> {
        Box::new(move |_token| self())
    }
}

impl<W, F> IntoWork<W, TokenWork> for F
where
    W: WaitStrategy,
    F: for<'a> FnMut(&mut WorkContractToken<'a, W>) + Send + 'static,
{
    fn into_work(self) -> WorkFn<W> {
        Box::new(self)
    }
}
