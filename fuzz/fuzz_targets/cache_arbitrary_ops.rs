#![no_main]

use std::collections::HashMap;
use std::sync::Arc;

use flywheel::cache::{Cache, EntryState};
use libfuzzer_sys::fuzz_target;

// Fuzz arbitrary operation sequences on Cache
//
// Tests random sequences of register, claim, complete, fail, reset and set,
// checking the state counters against the slots after every step.
fuzz_target!(|data: &[u8]| {
    let cache: Cache<u8, u8> = Cache::new();
    let mut flights: Vec<(u64, Vec<u8>)> = Vec::new();

    for pair in data.chunks_exact(2) {
        let op = pair[0] % 7;
        let key = pair[1] % 32;

        match op {
            0 => {
                let fresh = cache.register(key);
                if fresh {
                    assert!(matches!(cache.peek(&key), Some(EntryState::Pending)));
                }
            },
            1 => {
                // claim every pending key; nothing may be claimed twice
                let pending = cache.pending();
                let claim = cache.claim(&pending);
                assert_eq!(claim.keys.len(), pending.len());
                assert!(cache.claim(&claim.keys).is_empty());
                if !claim.is_empty() {
                    flights.push((claim.flush, claim.keys));
                }
            },
            2 => {
                // complete the oldest flight with the even keys only
                if !flights.is_empty() {
                    let (flush, keys) = flights.remove(0);
                    let fetched: HashMap<u8, u8> =
                        keys.iter().filter(|k| *k % 2 == 0).map(|k| (*k, *k)).collect();
                    let settled = cache.complete(flush, &keys, fetched);
                    assert!(settled.resolved + settled.missing <= keys.len());
                }
            },
            3 => {
                if let Some((flush, keys)) = flights.pop() {
                    let error = Arc::new(std::io::Error::other("fuzz"));
                    let reverted = cache.fail(flush, &keys, error);
                    assert!(reverted <= keys.len());
                }
            },
            4 => {
                let known = cache.contains(&key);
                assert_eq!(cache.reset(&key), known);
            },
            5 => {
                cache.set(key, key);
                assert!(cache.is_pinned(&key));
            },
            _ => {
                let _ = cache.put(&key, key);
            },
        }

        let counts = cache.counts();
        assert_eq!(counts.total(), cache.len());
        assert!(cache.check_invariants().is_ok());
    }
});
