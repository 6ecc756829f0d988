use std::sync::atomic::{AtomicU64, Ordering};

/// Optional counters for monitoring group behavior. Updated only when the
/// group was configured with metrics enabled.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    contracts_created: AtomicU64,
    contracts_released: AtomicU64,
    executions: AtomicU64,
    release_executions: AtomicU64,
    empty_selects: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_contract_created(&self) {
        self.contracts_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_contract_released(&self) {
        self.contracts_released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_release_execution(&self) {
        self.release_executions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_empty_select(&self) {
        self.empty_selects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            contracts_created: self.contracts_created.load(Ordering::Relaxed),
            contracts_released: self.contracts_released.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            release_executions: self.release_executions.load(Ordering::Relaxed),
            empty_selects: self.empty_selects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a group's metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Contracts handed out by `create_contract`.
    pub contracts_created: u64,
    /// Release callbacks completed (slots returned to the pool).
    pub contracts_released: u64,
    /// Work-function executions (release-path visits not included).
    pub executions: u64,
    /// Worker visits that diverted to the release path.
    pub release_executions: u64,
    /// `execute_next` calls that found the tree empty.
    pub empty_selects: u64,
}
