//! Worker threads for driving a work-contract group.
//!
//! The scheduler core deliberately owns no threads; a worker is any loop that
//! calls `execute_next` until told to stop. This crate provides that loop:
//! spawn N workers over an `Arc`'d group, optionally pinned to CPUs, with a
//! panic observer for work functions that unwind.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use work_contract::WorkContractGroup;
//! use work_contract_pool::WorkerPool;
//!
//! let group = Arc::new(WorkContractGroup::new(256));
//! let pool = WorkerPool::with_worker_count(Arc::clone(&group), 2).unwrap();
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&count);
//! let contract = group
//!     .create_scheduled_contract(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//!
//! while count.load(Ordering::Relaxed) == 0 {
//!     std::thread::yield_now();
//! }
//!
//! drop(contract);
//! group.stop();
//! pool.join().unwrap();
//! ```

use crossbeam_utils::Backoff;
use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use work_contract::{WaitStrategy, WorkContractGroup};

/// Error types for pool construction and teardown.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    /// One or more workers terminated by panic (only reachable without a
    /// panic observer installed).
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked {
        /// How many workers died unwinding.
        count: usize,
    },
}

/// Observer for panics escaping a work or release function.
pub type PanicObserver = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

/// Per-worker settings.
#[derive(Clone, Default)]
pub struct WorkerConfig {
    /// CPU to pin this worker to. Honored on Linux with the `affinity`
    /// feature; ignored elsewhere.
    pub cpu: Option<usize>,
}

/// Pool-wide settings.
#[derive(Clone, Default)]
pub struct PoolConfig {
    /// One entry per worker thread.
    pub workers: Vec<WorkerConfig>,
    /// Called with the panic payload when a work function unwinds; the
    /// worker then resumes its loop. Without an observer the worker dies
    /// and `join` reports it.
    pub on_panic: Option<PanicObserver>,
}

impl PoolConfig {
    /// `count` workers with no pinning.
    pub fn with_worker_count(count: usize) -> Self {
        Self {
            workers: vec![WorkerConfig::default(); count],
            on_panic: None,
        }
    }

    /// One worker per given CPU id, each pinned to it.
    pub fn pinned(cpus: impl IntoIterator<Item = usize>) -> Self {
        Self {
            workers: cpus
                .into_iter()
                .map(|cpu| WorkerConfig { cpu: Some(cpu) })
                .collect(),
            on_panic: None,
        }
    }

    /// Installs a panic observer.
    pub fn with_panic_observer(mut self, observer: PanicObserver) -> Self {
        self.on_panic = Some(observer);
        self
    }
}

/// A set of worker threads looping `execute_next` over one group.
///
/// Workers exit when [`stop`](Self::stop) is called or the group itself
/// stops. For blocking groups the group's `stop` is what wakes sleeping
/// workers; `stop` here asks the group to stop as well, so a plain
/// `pool.stop(); pool.join()` shuts both down.
pub struct WorkerPool {
    threads: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    stop_group: Box<dyn Fn() + Send + Sync>,
}

impl WorkerPool {
    /// Spawns one worker per `config.workers` entry.
    pub fn new<W: WaitStrategy>(
        group: Arc<WorkContractGroup<W>>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(config.workers.len());

        for (index, worker) in config.workers.iter().enumerate() {
            let group = Arc::clone(&group);
            let stop = Arc::clone(&stop);
            let on_panic = config.on_panic.clone();
            let cpu = worker.cpu;
            let handle = std::thread::Builder::new()
                .name(format!("work-contract-worker-{index}"))
                .spawn(move || {
                    if let Some(cpu) = cpu {
                        pin_to_cpu(cpu);
                    }
                    run_worker(&group, &stop, on_panic.as_ref());
                })?;
            threads.push(handle);
        }

        Ok(Self {
            threads,
            stop,
            stop_group: Box::new(move || group.stop()),
        })
    }

    /// Spawns `count` unpinned workers.
    pub fn with_worker_count<W: WaitStrategy>(
        group: Arc<WorkContractGroup<W>>,
        count: usize,
    ) -> Result<Self, PoolError> {
        Self::new(group, PoolConfig::with_worker_count(count))
    }

    /// Asks every worker to exit after its current execution, and stops the
    /// group so sleeping (blocking-mode) workers wake up.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        (self.stop_group)();
    }

    /// Waits for every worker to exit. Call [`stop`](Self::stop) (or stop
    /// the group) first, or this blocks until they do.
    pub fn join(self) -> Result<(), PoolError> {
        let mut panicked = 0;
        for handle in self.threads {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(PoolError::WorkerPanicked { count: panicked });
        }
        Ok(())
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }
}

fn run_worker<W: WaitStrategy>(
    group: &WorkContractGroup<W>,
    stop: &AtomicBool,
    on_panic: Option<&PanicObserver>,
) {
    let backoff = Backoff::new();
    while !stop.load(Ordering::Acquire) && !group.is_stopped() {
        let executed = match on_panic {
            Some(observer) => {
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    group.execute_next()
                })) {
                    Ok(executed) => executed,
                    Err(payload) => {
                        (**observer)(payload);
                        true
                    }
                }
            }
            None => group.execute_next(),
        };
        if executed {
            backoff.reset();
        } else {
            // Empty tree (non-blocking mode) or spurious wake: back off
            // before probing again.
            backoff.snooze();
        }
    }
}

#[cfg(all(feature = "affinity", target_os = "linux"))]
fn pin_to_cpu(cpu: usize) {
    // SAFETY: the set is zero-initialized, CPU_SET writes within it, and
    // sched_setaffinity only reads it. A failed call leaves the default
    // affinity in place, which is acceptable for a hint.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(all(feature = "affinity", target_os = "linux")))]
fn pin_to_cpu(_cpu: usize) {}
