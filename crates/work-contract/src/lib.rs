//! Work contracts — a lock-free scheduler of repeatable work units.
//!
//! Many producer threads schedule contracts; many worker threads select and
//! execute them. Instead of a shared queue (one head, one tail, everyone on
//! the same cache lines), scheduled contracts live in a hierarchical counting
//! **signal tree**: selection walks packed atomic counters in O(log capacity),
//! each thread biases its own traversal, and a mirror availability tree hands
//! out slots to new contracts.
//!
//! # Key properties
//!
//! - Lock-free `schedule` and selection paths; the only mutexes guard the
//!   release token and (in blocking mode) the sleep/wake protocol
//! - Schedules arriving during an execution coalesce into exactly one
//!   follow-up execution; a contract's work function never races itself
//! - Releasing a contract is safe while executions race against it: the
//!   release callback runs exactly once, then the slot is recycled
//! - Fixed capacity, fixed memory: no allocation after construction apart
//!   from the per-contract callback boxes
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use work_contract::WorkContractGroup;
//!
//! let group = WorkContractGroup::new(256);
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&count);
//! let contract = group
//!     .create_contract(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .expect("group has free slots");
//!
//! contract.schedule();
//! contract.schedule(); // coalesces with the one above
//! while group.execute_next() {}
//!
//! assert_eq!(count.load(Ordering::Relaxed), 1);
//! ```
//!
//! Workers normally run on their own threads, each looping
//! [`execute_next`](WorkContractGroup::execute_next); the
//! [`BlockingWorkContractGroup`] variant parks them while the tree is empty.
//! The companion `work-contract-pool` crate provides such a worker loop.

mod config;
mod contract;
mod error;
mod group;
mod invariants;
mod metrics;
mod release_token;
mod slot;
mod tree;
mod waiter;

pub use config::{GroupConfig, HIGH_FANOUT_CONFIG, LOW_FOOTPRINT_CONFIG};
pub use contract::{IntoWork, PlainWork, TokenWork, WorkContract, WorkContractToken, WorkFn};
pub use error::CreateContractError;
pub use group::{BlockingWorkContractGroup, WorkContractGroup};
pub use metrics::MetricsSnapshot;
pub use tree::SignalTree;
pub use waiter::{Blocking, NonBlocking, WaitStrategy};
