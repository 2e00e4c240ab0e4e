// ==============================================
// PROVIDER CONCURRENCY TESTS (integration)
// ==============================================
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use flywheel::error::Error;
use flywheel::prelude::*;
use flywheel::testing::MockBackend;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn numbers(n: u32) -> MockBackend<u32, u32> {
    MockBackend::new((0..n).map(|i| (i, i * 2)))
}

#[test]
fn concurrent_resolves_share_one_fetch() {
    init_tracing();
    let backend = numbers(64);
    backend.set_latency(Duration::from_millis(50));
    let provider: Provider<u32, u32> = Provider::new(backend.clone());
    provider.register_many(0..64);

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let provider = provider.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let id = (t as u32 * 7) % 64;
                *provider.resolve(&id).unwrap()
            })
        })
        .collect();

    for (t, handle) in handles.into_iter().enumerate() {
        let id = (t as u32 * 7) % 64;
        assert_eq!(handle.join().unwrap(), id * 2);
    }
    assert_eq!(backend.call_count(), 1);
    assert_eq!(provider.counts().resolved, 64);
    provider.check_invariants().unwrap();
}

#[test]
fn waiter_observes_fetch_failure() {
    init_tracing();
    let backend = numbers(4);
    backend.set_latency(Duration::from_millis(300));
    backend.fail_next(1);
    let provider: Provider<u32, u32> = Provider::new(backend.clone());
    provider.register_many([1, 2]);

    let owner = {
        let provider = provider.clone();
        thread::spawn(move || provider.resolve(&1))
    };
    thread::sleep(Duration::from_millis(20));
    let waiter = provider.resolve(&2);

    assert!(matches!(owner.join().unwrap(), Err(Error::FetchFailed { .. })));
    assert!(matches!(waiter, Err(Error::FetchFailed { batch_len: 2, .. })));
    assert_eq!(backend.call_count(), 1);
    assert_eq!(provider.pending_len(), 2);

    assert_eq!(*provider.resolve(&2).unwrap(), 4);
    assert_eq!(backend.call_count(), 2);
}

#[test]
fn waiter_keeps_failure_when_retrier_reclaims_first() {
    init_tracing();
    let backend = numbers(4);
    backend.set_latency(Duration::from_millis(200));
    backend.fail_next(1);
    let provider: Provider<u32, u32> = Provider::new(backend.clone());
    provider.register_many([1, 2]);

    let owner = {
        let provider = provider.clone();
        thread::spawn(move || provider.resolve(&1))
    };
    while !matches!(provider.state(&1), Some(EntryState::InFlight(_))) {
        thread::yield_now();
    }
    let waiter = {
        let provider = provider.clone();
        thread::spawn(move || provider.resolve(&2))
    };
    let retrier = {
        let provider = provider.clone();
        thread::spawn(move || {
            while !matches!(provider.state(&1), Some(EntryState::Pending)) {
                thread::yield_now();
            }
            provider.resolve(&1)
        })
    };

    assert!(matches!(owner.join().unwrap(), Err(Error::FetchFailed { .. })));
    assert!(matches!(waiter.join().unwrap(), Err(Error::FetchFailed { batch_len: 2, .. })));
    assert_eq!(*retrier.join().unwrap().unwrap(), 2);
    assert_eq!(backend.call_count(), 2);
    provider.check_invariants().unwrap();
}

#[test]
fn disjoint_containers_fetch_in_parallel() {
    init_tracing();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let provider = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        Provider::from_fn(move |ids: &[u32]| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(ids.iter().map(|id| (*id, *id)).collect::<HashMap<_, _>>())
        })
    };

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [[1u32, 2], [3, 4]]
        .into_iter()
        .map(|ids| {
            let mut container = provider.container();
            container.extend(ids);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                container.values().unwrap().len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 2);
    }
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn every_identifier_is_fetched_once_under_contention() {
    init_tracing();
    let backend = numbers(200);
    backend.set_latency(Duration::from_millis(5));
    let provider: Provider<u32, u32> = Provider::new(backend.clone());

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let provider = provider.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut container = provider.container();
                container.extend((0..200).filter(|i| i % (t as u32 + 2) == 0));
                container.iter().filter(|v| v.is_ok()).count()
            })
        })
        .collect();

    for (t, handle) in handles.into_iter().enumerate() {
        let expected = (0..200u32).filter(|i| i % (t as u32 + 2) == 0).count();
        assert_eq!(handle.join().unwrap(), expected);
    }
    for id in 0..200u32 {
        assert!(backend.times_requested(&id) <= 1, "id {id} fetched twice");
    }
    provider.check_invariants().unwrap();
}

#[test]
fn invalidate_during_fetch_discards_stale_value() {
    init_tracing();
    let backend = numbers(4);
    backend.set_latency(Duration::from_millis(150));
    let provider: Provider<u32, u32> = Provider::new(backend.clone());
    provider.register(1);

    let reader = {
        let provider = provider.clone();
        thread::spawn(move || provider.resolve(&1))
    };
    thread::sleep(Duration::from_millis(30));
    backend.insert(1, 100);
    assert!(provider.invalidate(&1));

    assert_eq!(*reader.join().unwrap().unwrap(), 100);
    assert_eq!(backend.call_count(), 2);
    provider.check_invariants().unwrap();
}
