//! Provider: owner of the bulk fetch capability and of one [`Cache`].
//!
//! A provider accumulates registered identifiers and pays for all of them
//! with a single [`BulkFetch::bulk_fetch`] call the first time any value is
//! needed. Later reads are served from the cache.
//!
//! ## Flush Protocol
//!
//! ```text
//!   resolve(id)
//!      │
//!      ▼
//!   peek(id) ──Resolved──► return value
//!      │ ──Missing─────► MissingItem (or fallback)
//!      │ ──InFlight(f)─► wait_settled(id, f) ──► peek again
//!      │
//!      ▼ Pending
//!   snapshot pending ids in scope
//!      │
//!      ▼
//!   claim(snapshot) ──nothing claimed──► peek again (someone else owns it)
//!      │
//!      ▼
//!   bulk_fetch(claimed)   (no lock held)
//!      │ Ok(map)                         │ Err(e)
//!      ▼                                 ▼
//!   complete: Resolved / Missing       fail: back to Pending,
//!   notify waiters                     notify waiters, FetchFailed
//!      │
//!      ▼
//!   peek again
//! ```
//!
//! ## Sharing
//!
//! `Provider` is a cheap handle (`Arc` inside); clones share one cache, so a
//! value resolved through one [`Container`] is immediately available to every
//! other container bound to the same provider.
//!
//! ## Example Usage
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use flywheel::provider::Provider;
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&calls);
//! let provider = Provider::from_fn(move |ids: &[u32]| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(ids.iter().map(|id| (*id, format!("item-{id}"))).collect::<HashMap<_, _>>())
//! });
//!
//! provider.register_many([1, 2, 3]);
//! assert_eq!(provider.resolve(&2).unwrap().as_str(), "item-2");
//! assert_eq!(provider.resolve(&3).unwrap().as_str(), "item-3");
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::builder::ProviderBuilder;
use crate::cache::{Cache, EntryState, Settled, StateCounts};
use crate::container::Container;
use crate::error::{BoxError, Error, InvariantError, Result, SharedError};
#[cfg(feature = "metrics")]
use crate::metrics::{
    FlushMetricsRecorder, MetricsReset, MetricsSnapshotProvider, ProviderMetrics,
    ProviderMetricsSnapshot,
};
use crate::traits::{BulkFetch, FetchResult, Identifier};

/// Which pending identifiers a flush scoops up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushScope {
    /// Only the pending identifiers of the container being read.
    #[default]
    Container,
    /// Every pending identifier known to the provider.
    Provider,
}

/// Pending-set selection for one resolve call.
#[derive(Debug)]
pub(crate) enum Scope<'a, K> {
    Provider,
    Keys(&'a [K]),
}

#[derive(Debug, thiserror::Error)]
#[error("bulk fetch panicked")]
struct FetchPanicked;

pub(crate) struct ProviderInner<K, V> {
    name: String,
    cache: Cache<K, V>,
    fetcher: Box<dyn BulkFetch<K, V>>,
    fallback: Option<Arc<V>>,
    #[cfg(feature = "metrics")]
    metrics: ProviderMetrics,
}

/// Handle to a bulk-fetching, caching item source.
pub struct Provider<K, V> {
    inner: Arc<ProviderInner<K, V>>,
}

impl<K, V> Clone for Provider<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Provider<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.inner.name)
            .field("cache", &self.inner.cache)
            .field("has_fallback", &self.inner.fallback.is_some())
            .finish()
    }
}

impl<K, V> Provider<K, V> {
    /// Name used in log events and metric labels.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Value returned in place of `MissingItem`, if configured.
    pub fn fallback(&self) -> Option<&Arc<V>> {
        self.inner.fallback.as_ref()
    }
}

impl<K: Identifier, V> Provider<K, V> {
    /// Creates a provider around `fetcher` with default settings.
    pub fn new(fetcher: impl BulkFetch<K, V> + 'static) -> Self {
        ProviderBuilder::new().fetcher(fetcher).build()
    }

    /// Creates a provider from a fetch closure.
    pub fn from_fn<F>(fetch: F) -> Self
    where
        F: Fn(&[K]) -> FetchResult<K, V> + Send + Sync + 'static,
    {
        ProviderBuilder::new().fetch_with(fetch).build()
    }

    /// Returns a builder for configuring name, capacity and fallback.
    pub fn builder() -> ProviderBuilder<K, V> {
        ProviderBuilder::new()
    }

    pub(crate) fn from_parts(
        name: String,
        capacity: usize,
        fetcher: Box<dyn BulkFetch<K, V>>,
        fallback: Option<Arc<V>>,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                name,
                cache: Cache::with_capacity(capacity),
                fetcher,
                fallback,
                #[cfg(feature = "metrics")]
                metrics: ProviderMetrics::default(),
            }),
        }
    }

    /// Returns `true` if both handles share the same cache.
    pub fn same_provider(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates an empty container bound to this provider.
    pub fn container(&self) -> Container<K, V> {
        Container::new(self)
    }

    /// Registers `id` as pending if it is not known yet. Idempotent.
    ///
    /// Returns `true` if `id` was newly registered.
    pub fn register(&self, id: K) -> bool {
        self.inner.cache.register(id)
    }

    /// Registers every identifier in `ids`. Returns how many were new.
    pub fn register_many<I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = K>,
    {
        ids.into_iter().filter(|id| self.register(id.clone())).count()
    }

    /// Returns the value for `id`, flushing every pending identifier of this
    /// provider if `id` has not been fetched yet.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingItem`] if the backend omitted `id` (and no fallback
    ///   is configured).
    /// - [`Error::FetchFailed`] if the flush covering `id` failed.
    /// - [`Error::NotRegistered`] if `id` was never registered.
    pub fn resolve(&self, id: &K) -> Result<Arc<V>> {
        self.resolve_scoped(id, Scope::Provider)
    }

    pub(crate) fn resolve_scoped(&self, id: &K, scope: Scope<'_, K>) -> Result<Arc<V>> {
        let cache = &self.inner.cache;
        let mut attempt = 0u32;
        loop {
            let state = cache.peek(id).ok_or_else(|| Error::not_registered(id))?;
            match state {
                EntryState::Resolved(value) => {
                    #[cfg(feature = "metrics")]
                    if attempt == 0 {
                        self.inner.metrics.record_hit();
                    }
                    trace!(provider = %self.inner.name, key = ?id, attempt, "resolved");
                    return Ok(value);
                },
                EntryState::Missing => return self.missing(id),
                EntryState::InFlight(flush) => {
                    #[cfg(feature = "metrics")]
                    self.inner.metrics.record_wait();
                    trace!(provider = %self.inner.name, key = ?id, flush, "waiting for in-flight fetch");
                    cache.wait_settled(id, flush)?;
                },
                EntryState::Pending => {
                    #[cfg(feature = "metrics")]
                    self.inner.metrics.record_miss();
                    let candidates = match scope {
                        Scope::Provider => cache.pending(),
                        Scope::Keys(keys) => cache.pending_among(keys),
                    };
                    self.flush(candidates)?;
                },
            }
            attempt += 1;
        }
    }

    fn missing(&self, id: &K) -> Result<Arc<V>> {
        match &self.inner.fallback {
            Some(fallback) => Ok(Arc::clone(fallback)),
            None => Err(Error::missing_item(id)),
        }
    }

    /// Forces `id` back to pending; the next read fetches it again.
    ///
    /// Also drops a value pinned with [`set`](Self::set). Returns `false` if
    /// `id` is unknown.
    pub fn invalidate(&self, id: &K) -> bool {
        let known = self.inner.cache.reset(id);
        if known {
            #[cfg(feature = "metrics")]
            self.inner.metrics.record_invalidation();
            trace!(provider = %self.inner.name, key = ?id, "invalidated");
        }
        known
    }

    /// Stores `value` for `id` directly, overriding whatever the backend
    /// returns for it until the next [`invalidate`](Self::invalidate).
    pub fn set(&self, id: K, value: V) {
        trace!(provider = %self.inner.name, key = ?id, "value set explicitly");
        self.inner.cache.set(id, value);
    }

    /// Fetches every pending identifier now. Returns how many were submitted.
    ///
    /// # Errors
    ///
    /// [`Error::FetchFailed`] if the bulk fetch failed.
    pub fn warm(&self) -> Result<usize> {
        self.flush(self.inner.cache.pending())
    }

    /// Claims `candidates` and runs one bulk fetch for whatever was claimed.
    pub(crate) fn flush(&self, candidates: Vec<K>) -> Result<usize> {
        if candidates.is_empty() {
            return Ok(0);
        }
        #[cfg(feature = "metrics")]
        self.inner.metrics.record_flush_attempt();
        let claim = self.inner.cache.claim(&candidates);
        if claim.is_empty() {
            trace!(provider = %self.inner.name, "pending items already claimed by another flush");
            return Ok(0);
        }

        let batch_len = claim.keys.len();
        #[cfg(feature = "metrics")]
        self.inner.metrics.record_fetch(batch_len);
        debug!(provider = %self.inner.name, flush = claim.flush, batch_len, "flushing pending items");

        let mut guard = FlushGuard {
            inner: &self.inner,
            flush: claim.flush,
            keys: claim.keys,
            armed: true,
        };
        let outcome = self.inner.fetcher.bulk_fetch(&guard.keys);
        guard.armed = false;

        match outcome {
            Ok(fetched) => {
                let settled = self.inner.cache.complete(guard.flush, &guard.keys, fetched);
                self.record_settled(guard.flush, settled);
                Ok(batch_len)
            },
            Err(err) => {
                let source: SharedError = Arc::from(err);
                #[cfg(feature = "metrics")]
                self.inner.metrics.record_fetch_failure();
                warn!(
                    provider = %self.inner.name,
                    flush = guard.flush,
                    batch_len,
                    error = %source,
                    "bulk fetch failed; batch returned to pending"
                );
                self.inner
                    .cache
                    .fail(guard.flush, &guard.keys, Arc::clone(&source));
                Err(Error::FetchFailed { batch_len, source })
            },
        }
    }

    fn record_settled(&self, flush: u64, settled: Settled) {
        #[cfg(feature = "metrics")]
        self.inner.metrics.record_settled(&settled);
        debug!(
            provider = %self.inner.name,
            flush,
            resolved = settled.resolved,
            missing = settled.missing,
            ignored = settled.ignored,
            "flush complete"
        );
    }

    /// Current state of `id`, if known.
    pub fn state(&self, id: &K) -> Option<EntryState<V>> {
        self.inner.cache.peek(id)
    }

    /// Returns `true` if `id` is known in any state.
    pub fn contains(&self, id: &K) -> bool {
        self.inner.cache.contains(id)
    }

    /// Number of identifiers known to this provider.
    pub fn len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Returns `true` if no identifier is known.
    pub fn is_empty(&self) -> bool {
        self.inner.cache.is_empty()
    }

    /// Number of identifiers waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.inner.cache.pending_len()
    }

    /// Number of identifiers in each state.
    pub fn counts(&self) -> StateCounts {
        self.inner.cache.counts()
    }

    pub(crate) fn cache(&self) -> &Cache<K, V> {
        &self.inner.cache
    }

    /// Validates the cache's internal bookkeeping.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        self.inner.cache.check_invariants()
    }

    /// Snapshot of this provider's counters and gauges.
    #[cfg(feature = "metrics")]
    pub fn metrics_snapshot(&self) -> ProviderMetricsSnapshot {
        self.inner
            .metrics
            .snapshot(&self.inner.name, self.inner.cache.counts())
    }

    /// Zeroes this provider's counters. Gauges are unaffected.
    #[cfg(feature = "metrics")]
    pub fn reset_metrics(&self) {
        self.inner.metrics.reset_metrics();
    }
}

#[cfg(feature = "metrics")]
impl<K: Identifier, V> MetricsSnapshotProvider<ProviderMetricsSnapshot> for Provider<K, V> {
    fn snapshot(&self) -> ProviderMetricsSnapshot {
        self.metrics_snapshot()
    }
}

/// Returns claimed identifiers to pending if the fetch unwinds.
struct FlushGuard<'a, K: Identifier, V> {
    inner: &'a ProviderInner<K, V>,
    flush: u64,
    keys: Vec<K>,
    armed: bool,
}

impl<K: Identifier, V> Drop for FlushGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.armed {
            #[cfg(feature = "metrics")]
            self.inner.metrics.record_fetch_failure();
            warn!(
                provider = %self.inner.name,
                flush = self.flush,
                batch_len = self.keys.len(),
                "bulk fetch panicked; batch returned to pending"
            );
            let source: SharedError = Arc::from(BoxError::from(FetchPanicked));
            self.inner.cache.fail(self.flush, &self.keys, source);
        }
    }
}
