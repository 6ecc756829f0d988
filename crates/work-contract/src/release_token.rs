use crate::group::GroupInner;
use crate::waiter::WaitStrategy;
use std::sync::{Mutex, PoisonError, Weak};

/// Shared mediator between a contract handle and its group.
///
/// The handle never holds a strong reference to the group; it reaches it
/// through this token, which the group nulls when it stops. One token exists
/// per live contract, co-owned by the group's slot table and the handle, so
/// either side can disappear first without the other dereferencing a dead
/// group.
pub(crate) struct ReleaseToken<W: WaitStrategy> {
    group: Mutex<Option<Weak<GroupInner<W>>>>,
}

impl<W: WaitStrategy> ReleaseToken<W> {
    pub(crate) fn new(group: Weak<GroupInner<W>>) -> Self {
        Self {
            group: Mutex::new(Some(group)),
        }
    }

    /// Forwards a release request for `slot` to the group, consuming the
    /// token's group pointer. Returns `false` if the token was already
    /// consumed or orphaned, or the group is gone.
    pub(crate) fn schedule_release(&self, slot: u64) -> bool {
        let taken = self
            .group
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken.and_then(|weak| weak.upgrade()) {
            Some(group) => {
                group.release(slot);
                true
            }
            None => false,
        }
    }

    /// Severs the token from the group. Called for every live token by
    /// `stop`.
    pub(crate) fn orphan(&self) {
        *self.group.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether the token still points at a live group.
    pub(crate) fn is_valid(&self) -> bool {
        self.group
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}
