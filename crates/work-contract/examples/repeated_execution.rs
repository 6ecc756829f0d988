//! A single contract re-scheduling itself from inside its work function,
//! driven by one worker loop on the main thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use work_contract::{NonBlocking, WorkContractGroup, WorkContractToken};

const EXECUTIONS: usize = 1_000_000;

fn main() {
    let group = WorkContractGroup::new(256);
    let remaining = Arc::new(AtomicUsize::new(EXECUTIONS));

    let counter = Arc::clone(&remaining);
    let _contract = group
        .create_scheduled_contract(move |token: &mut WorkContractToken<'_, NonBlocking>| {
            if counter.fetch_sub(1, Ordering::Relaxed) > 1 {
                token.schedule();
            }
        })
        .expect("fresh group has free slots");

    let started = Instant::now();
    let mut executed = 0usize;
    while group.execute_next() {
        executed += 1;
    }
    let elapsed = started.elapsed();

    println!(
        "{executed} executions in {elapsed:?} ({:.0} per second)",
        executed as f64 / elapsed.as_secs_f64()
    );
}
