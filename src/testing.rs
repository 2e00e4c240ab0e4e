//! In-memory backend for tests and examples.
//!
//! [`MockBackend`] serves values from a map, records every batch it is
//! asked for, and can be told to fail or stall, which makes flush counts and
//! concurrency behaviour observable.
//!
//! ```
//! use flywheel::provider::Provider;
//! use flywheel::testing::MockBackend;
//!
//! let backend = MockBackend::new([(1u32, "one"), (2, "two")]);
//! let provider: Provider<u32, &str> = Provider::new(backend.clone());
//! provider.register_many([1, 2, 3]);
//!
//! assert_eq!(*provider.resolve(&2).unwrap(), "two");
//! assert!(provider.resolve(&3).is_err());
//! assert_eq!(backend.calls(), vec![vec![1, 2, 3]]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::BoxError;
use crate::traits::{BulkFetch, FetchResult, Identifier};

/// Error returned by a [`MockBackend`] told to fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mock backend failure on call {call}")]
pub struct MockFailure {
    pub call: usize,
}

struct MockState<K, V> {
    data: RwLock<FxHashMap<K, V>>,
    calls: Mutex<Vec<Vec<K>>>,
    failures_left: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

/// Map-backed [`BulkFetch`] that records its calls.
///
/// Clones share state, so a test can keep one handle while the provider owns
/// another.
pub struct MockBackend<K, V> {
    state: Arc<MockState<K, V>>,
}

impl<K, V> Clone for MockBackend<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for MockBackend<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("entries", &self.state.data.read().len())
            .field("calls", &self.state.calls.lock().len())
            .finish()
    }
}

impl<K: Identifier, V: Clone> MockBackend<K, V> {
    /// Creates a backend seeded with `data`.
    pub fn new<I>(data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            state: Arc::new(MockState {
                data: RwLock::new(data.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(0),
                latency: Mutex::new(None),
            }),
        }
    }

    /// Creates a backend with no data; every identifier comes back missing.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Adds or replaces a backend value.
    pub fn insert(&self, key: K, value: V) {
        self.state.data.write().insert(key, value);
    }

    /// Removes a backend value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.data.write().remove(key)
    }

    /// Makes the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.state.failures_left.store(n, Ordering::SeqCst);
    }

    /// Sleeps for `latency` inside every call before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = Some(latency);
    }

    /// Number of calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.state.calls.lock().len()
    }

    /// Every batch received, in call order.
    pub fn calls(&self) -> Vec<Vec<K>> {
        self.state.calls.lock().clone()
    }

    /// How many times `key` has been requested.
    pub fn times_requested(&self, key: &K) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|batch| batch.contains(key))
            .count()
    }
}

impl<K, V> BulkFetch<K, V> for MockBackend<K, V>
where
    K: Identifier + Send + Sync,
    V: Clone + Send + Sync,
{
    fn bulk_fetch(&self, ids: &[K]) -> FetchResult<K, V> {
        let call = {
            let mut calls = self.state.calls.lock();
            calls.push(ids.to_vec());
            calls.len()
        };

        let latency = *self.state.latency.lock();
        if let Some(latency) = latency {
            thread::sleep(latency);
        }

        let should_fail = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BoxError::from(MockFailure { call }));
        }

        let data = self.state.data.read();
        Ok(ids
            .iter()
            .filter_map(|id| data.get(id).map(|value| (id.clone(), value.clone())))
            .collect::<HashMap<_, _>>())
    }
}
