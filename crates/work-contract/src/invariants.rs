//! Debug assertion macros for scheduler invariants.
//!
//! Active in debug builds only (`debug_assert!`), zero overhead in release.
//! Used by the signal tree and the contract state machine.

// =============================================================================
// Signal tree: a unit reserved at a parent node is always published below it
// =============================================================================

/// A CAS-decrement descent that committed at the parent found this interior
/// node with both counters zero. Sets publish bottom-up and decrements apply
/// top-down, so a reserved unit always has a non-zero path below it.
macro_rules! debug_assert_interior_nonzero {
    ($index:expr) => {
        debug_assert!(
            false,
            "interior node {} empty during descent: a reserved unit vanished",
            $index
        )
    };
}

/// The bit chosen for claiming must lie inside the half the descent committed to.
macro_rules! debug_assert_claimed_bit {
    ($bit:expr, $half_mask:expr) => {
        debug_assert!(
            $bit & $half_mask != 0,
            "claimed bit {:#x} outside committed half {:#x}",
            $bit,
            $half_mask
        )
    };
}

// =============================================================================
// Contract state machine: the tree bit acts as a lock on the EXECUTE window
// =============================================================================

/// When a worker claims a slot out of the tree, no other worker can be inside
/// its EXECUTE window.
macro_rules! debug_assert_claim_exclusive {
    ($prev:expr, $execute:expr) => {
        debug_assert!(
            $prev & $execute == 0,
            "claimed a slot whose EXECUTE flag was already set (state {:#x})",
            $prev
        )
    };
}

/// A claim only ever happens on a slot the tree reported as scheduled.
macro_rules! debug_assert_claim_scheduled {
    ($prev:expr, $schedule:expr) => {
        debug_assert!(
            $prev & $schedule != 0,
            "claimed a slot without a pending schedule (state {:#x})",
            $prev
        )
    };
}

/// The worker clearing EXECUTE must be the one that set it.
macro_rules! debug_assert_was_executing {
    ($prev:expr, $execute:expr) => {
        debug_assert!(
            $prev & $execute != 0,
            "cleared EXECUTE on a slot that was not executing (state {:#x})",
            $prev
        )
    };
}

pub(crate) use debug_assert_claim_exclusive;
pub(crate) use debug_assert_claim_scheduled;
pub(crate) use debug_assert_claimed_bit;
pub(crate) use debug_assert_interior_nonzero;
pub(crate) use debug_assert_was_executing;
