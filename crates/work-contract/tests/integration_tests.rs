use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use work_contract::{NonBlocking, WorkContract, WorkContractGroup, WorkContractToken};

/// A contract that re-schedules itself a fixed number of times, then releases
/// itself by dropping its own handle out of a shared cell.
#[test]
fn test_self_rescheduling_contract_runs_to_completion() {
    let group = WorkContractGroup::new(8);
    let count = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let handle_cell: Arc<Mutex<Option<WorkContract>>> = Arc::new(Mutex::new(None));

    let counter = Arc::clone(&count);
    let cell = Arc::clone(&handle_cell);
    let release_counter = Arc::clone(&released);
    let contract = group
        .create_contract_with_release(
            move |token: &mut WorkContractToken<'_, NonBlocking>| {
                if counter.fetch_add(1, Ordering::Relaxed) + 1 < 16 {
                    token.schedule();
                } else {
                    drop(cell.lock().unwrap().take());
                }
            },
            move || {
                release_counter.fetch_add(1, Ordering::Relaxed);
            },
        )
        .unwrap();
    contract.schedule();
    *handle_cell.lock().unwrap() = Some(contract);

    // Single worker loop until the contract has torn itself down.
    while group.active_contract_count() > 0 {
        group.execute_next();
    }

    assert_eq!(count.load(Ordering::Relaxed), 16);
    assert_eq!(released.load(Ordering::Relaxed), 1);

    // The slot is reusable again.
    assert!(group.create_contract(|| {}).is_some());
}

/// Schedules arriving before and during a release coalesce; the release
/// callback runs exactly once and later schedules are no-ops.
#[test]
fn test_release_while_scheduled() {
    let group = WorkContractGroup::new(256);
    let work_runs = Arc::new(AtomicUsize::new(0));
    let release_runs = Arc::new(AtomicUsize::new(0));

    let work_counter = Arc::clone(&work_runs);
    let release_counter = Arc::clone(&release_runs);
    let mut contract = group
        .create_contract_with_release(
            move || {
                work_counter.fetch_add(1, Ordering::Relaxed);
            },
            move || {
                release_counter.fetch_add(1, Ordering::Relaxed);
            },
        )
        .unwrap();

    // One guaranteed execution, then a storm of redundant schedules.
    contract.schedule();
    assert!(group.execute_next());
    for _ in 0..1000 {
        contract.schedule();
    }
    assert!(contract.release());

    while group.active_contract_count() > 0 {
        group.execute_next();
    }

    let runs = work_runs.load(Ordering::Relaxed);
    assert!((1..=1001).contains(&runs), "work ran {runs} times");
    assert_eq!(release_runs.load(Ordering::Relaxed), 1);

    // The released handle is inert.
    assert!(!contract.is_valid());
    assert!(!contract.release());
}

/// Stop with live, scheduled handles: handles go inert, destruction is safe.
#[test]
fn test_stop_with_live_handles() {
    let group = WorkContractGroup::new(256);
    let executed = Arc::new(AtomicUsize::new(0));

    let mut contracts = Vec::new();
    for _ in 0..10 {
        let counter = Arc::clone(&executed);
        let contract = group
            .create_contract(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        contract.schedule();
        contracts.push(contract);
    }

    group.stop();

    for contract in &contracts {
        assert!(!contract.is_valid());
        contract.schedule(); // no-op
    }
    assert!(!group.execute_next());
    assert_eq!(executed.load(Ordering::Relaxed), 0);

    // Dropping the handles after stop must not re-enter the group.
    drop(contracts);
    assert!(!group.execute_next());
}

/// Capacity is fixed: creation fails at saturation and recovers after one
/// release is processed.
#[test]
fn test_capacity_exhaustion_and_recovery() {
    let group = WorkContractGroup::new(256);
    let mut contracts = Vec::new();
    for _ in 0..256 {
        contracts.push(group.create_contract(|| {}).unwrap());
    }
    assert_eq!(group.active_contract_count(), 256);
    assert!(group.create_contract(|| {}).is_none());

    // Free one slot and let the worker process the release.
    drop(contracts.pop());
    assert!(group.execute_next(), "release visit");
    assert!(group.create_contract(|| {}).is_some());
}

/// Blocking wait: a timed worker returns false on an empty group within the
/// timeout, and picks up work promptly once some arrives.
#[test]
fn test_blocking_timed_wait() {
    let group = Arc::new(WorkContractGroup::new_blocking(256));
    let count = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&count);
    let contract = group
        .create_contract(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

    let started = Instant::now();
    assert!(!group.execute_next_for(Duration::from_millis(100)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(95), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");

    // Producer on another thread; the sleeping worker must wake.
    let producer_group = Arc::clone(&group);
    let worker = thread::spawn(move || producer_group.execute_next_for(Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(20));
    contract.schedule();
    assert!(worker.join().unwrap());
    assert_eq!(count.load(Ordering::Relaxed), 1);
}

/// Blocking workers parked in the untimed wait are woken by stop.
#[test]
fn test_stop_wakes_blocking_workers() {
    let group = Arc::new(WorkContractGroup::new_blocking(256));
    let mut workers = Vec::new();
    for _ in 0..4 {
        let group = Arc::clone(&group);
        workers.push(thread::spawn(move || group.execute_next()));
    }
    thread::sleep(Duration::from_millis(50));
    group.stop();
    for worker in workers {
        assert!(!worker.join().unwrap(), "stop wakeup returns false");
    }
}

/// Short saturation smoke: many self-rescheduling contracts, several workers,
/// every contract makes progress and teardown drains cleanly.
#[test]
fn test_contention_smoke() {
    const CONTRACTS: usize = 64;
    const WORKERS: usize = 4;

    let group = Arc::new(WorkContractGroup::new(256));
    let counts: Arc<Vec<AtomicUsize>> =
        Arc::new((0..CONTRACTS).map(|_| AtomicUsize::new(0)).collect());

    let mut contracts = Vec::new();
    for slot in 0..CONTRACTS {
        let counts = Arc::clone(&counts);
        let contract = group
            .create_scheduled_contract(move |token: &mut WorkContractToken<'_, NonBlocking>| {
                counts[slot].fetch_add(1, Ordering::Relaxed);
                token.schedule();
            })
            .unwrap();
        contracts.push(contract);
    }

    let deadline = Instant::now() + Duration::from_millis(200);
    let mut workers = Vec::new();
    for _ in 0..WORKERS {
        let group = Arc::clone(&group);
        workers.push(thread::spawn(move || {
            let mut executed = 0u64;
            while Instant::now() < deadline {
                if group.execute_next() {
                    executed += 1;
                }
            }
            executed
        }));
    }
    let total: u64 = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert!(total > 10_000, "only {total} executions in 200ms");

    group.stop();
    drop(contracts);
    assert!(counts.iter().all(|c| c.load(Ordering::Relaxed) > 0));
}

/// Full saturation run with a fairness bound. Slow; run explicitly with
/// `cargo test --release -- --ignored`.
#[test]
#[ignore = "one-second saturation run"]
fn test_saturation_fairness() {
    const CONTRACTS: usize = 256;
    const WORKERS: usize = 8;

    let group = Arc::new(WorkContractGroup::new(CONTRACTS as u64));
    let counts: Arc<Vec<AtomicUsize>> =
        Arc::new((0..CONTRACTS).map(|_| AtomicUsize::new(0)).collect());

    let mut contracts = Vec::new();
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
                .unwrap(),
        );
    }

    let deadline = Instant::now() + Duration::from_secs(1);
    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                while Instant::now() < deadline {
                    group.execute_next();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    group.stop();

    let per_slot: Vec<f64> = counts
        .iter()
        .map(|c| c.load(Ordering::Relaxed) as f64)
        .collect();
    let total: f64 = per_slot.iter().sum();
    assert!(total > 1e6, "only {total} executions in one second");

    let mean = total / per_slot.len() as f64;
    let variance =
        per_slot.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (per_slot.len() - 1) as f64;
    let cv = variance.sqrt() / mean;
    assert!(cv < 0.2, "per-slot execution spread too wide (cv = {cv:.3})");
}
