//! Saturation demo: every slot holds a self-rescheduling contract and a pool
//! of workers burns through them for one second, then the per-slot execution
//! spread is reported.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use work_contract::{NonBlocking, WorkContractGroup, WorkContractToken};
use work_contract_pool::WorkerPool;

const CONTRACTS: usize = 256;
const WORKERS: usize = 8;

fn gather_stats(input: &[usize]) -> (usize, f64, f64, f64) {
    let total: usize = input.iter().sum();
    let mean = total as f64 / input.len() as f64;
    let variance = input
        .iter()
        .map(|&v| (v as f64 - mean) * (v as f64 - mean))
        .sum::<f64>()
        / (input.len() - 1) as f64;
    let sd = variance.sqrt();
    (total, mean, sd, sd / mean)
}

fn main() {
    let group = Arc::new(WorkContractGroup::new(CONTRACTS as u64));
    let counts: Arc<Vec<AtomicUsize>> =
        Arc::new((0..CONTRACTS).map(|_| AtomicUsize::new(0)).collect());

    let mut contracts = Vec::with_capacity(CONTRACTS);
    for slot in 0..CONTRACTS {
        let counts = Arc::clone(&counts);
        contracts.push(
            group
                .create_scheduled_contract(
                    move |token: &mut WorkContractToken<'_, NonBlocking>| {
                        counts[slot].fetch_add(1, Ordering::Relaxed);
                        token.schedule();
                    },
                )
                .expect("group sized for every contract"),
        );
    }

    let pool = WorkerPool::with_worker_count(Arc::clone(&group), WORKERS)
        .expect("worker threads spawn");
    std::thread::sleep(Duration::from_secs(1));
    pool.stop();
    pool.join().expect("no worker panicked");
    drop(contracts);

    let per_slot: Vec<usize> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    let (total, mean, sd, cv) = gather_stats(&per_slot);
    println!("total executions: {total}");
    println!("per contract:     mean {mean:.1}, sd {sd:.1}, cv {cv:.3}");
}
