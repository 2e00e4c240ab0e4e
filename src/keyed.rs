//! Providers looked up by a compound value with computed keys.
//!
//! A [`KeyedProvider`] derives two keys from every value callers hand it:
//!
//! - a **load key** (`L`): what the backend is asked for
//! - a **cache key** (`K`): what the result is stored and looked up under
//!
//! Many cache keys may share one load key (for example, every user of one
//! profession is loaded by a single per-profession query). Either key
//! function may return `None` to opt a value out: nothing is registered or
//! fetched for it, and reads return the empty result.
//!
//! ## Architecture
//!
//! ```text
//!   register(&q) ──► load_key(q) = l, cache_key(q) = k
//!                         │
//!                         ├─► load_keys[k] = l   (first registration wins)
//!                         └─► Provider<K, V>::register(k)
//!
//!   flush of cache keys [k1, k2, k3]
//!         │
//!         ▼
//!   distinct load keys [l1, l2]  ──► fetch(&[L]) ──► HashMap<K, V>
//! ```
//!
//! The inner [`Provider`] still owns claims, waiters and failure handling,
//! so a keyed provider batches and shares results exactly like a plain one.
//!
//! ## Example Usage
//!
//! ```
//! use std::collections::HashMap;
//!
//! use flywheel::keyed::KeyedProvider;
//!
//! #[derive(Debug)]
//! struct Order {
//!     id: u32,
//!     region: &'static str,
//! }
//!
//! let orders: KeyedProvider<Order, &'static str, u32, String> = KeyedProvider::builder()
//!     .load_key(|order: &Order| Some(order.region))
//!     .cache_key(|order: &Order| Some(order.id))
//!     .fetch_with(|regions: &[&'static str]| {
//!         let mut found = HashMap::new();
//!         for region in regions {
//!             if *region == "eu" {
//!                 found.insert(7, "eu order 7".to_string());
//!             }
//!         }
//!         Ok(found)
//!     })
//!     .build();
//!
//! let order = Order { id: 7, region: "eu" };
//! orders.register(&order);
//! assert_eq!(orders.resolve(&order).unwrap().as_str(), "eu order 7");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::builder::ProviderBuilder;
use crate::cache::EntryState;
use crate::error::{ConfigError, Error, Result};
use crate::provider::Provider;
use crate::traits::{BulkFetch, FetchResult, Identifier};

type KeyFn<Q, T> = Arc<dyn Fn(&Q) -> Option<T> + Send + Sync>;
type LoadFetch<L, K, V> = Box<dyn Fn(&[L]) -> FetchResult<K, V> + Send + Sync>;
type LoadKeys<K, L> = Arc<RwLock<FxHashMap<K, L>>>;

/// Turns a batch of cache keys into one fetch of their distinct load keys.
struct LoadKeyFetch<L, K, V> {
    load_keys: LoadKeys<K, L>,
    fetch: LoadFetch<L, K, V>,
}

impl<L, K, V> BulkFetch<K, V> for LoadKeyFetch<L, K, V>
where
    L: Identifier + Send + Sync,
    K: Identifier + Send + Sync,
{
    fn bulk_fetch(&self, ids: &[K]) -> FetchResult<K, V> {
        let batch: Vec<L> = {
            let load_keys = self.load_keys.read();
            let mut seen = FxHashSet::default();
            ids.iter()
                .filter_map(|id| load_keys.get(id))
                .filter(|load_key| seen.insert(*load_key))
                .cloned()
                .collect()
        };
        if batch.is_empty() {
            return Ok(HashMap::new());
        }
        (self.fetch)(&batch)
    }
}

/// Provider keyed by values of type `Q` through computed load and cache keys.
pub struct KeyedProvider<Q, L, K, V> {
    provider: Provider<K, V>,
    load_key: KeyFn<Q, L>,
    cache_key: KeyFn<Q, K>,
    load_keys: LoadKeys<K, L>,
}

impl<Q, L, K, V> Clone for KeyedProvider<Q, L, K, V> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            load_key: Arc::clone(&self.load_key),
            cache_key: Arc::clone(&self.cache_key),
            load_keys: Arc::clone(&self.load_keys),
        }
    }
}

impl<Q, L, K, V> fmt::Debug for KeyedProvider<Q, L, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedProvider")
            .field("provider", &self.provider.name())
            .field("load_keys", &self.load_keys.read().len())
            .finish()
    }
}

impl<Q, L, K, V> KeyedProvider<Q, L, K, V>
where
    Q: 'static,
    L: Identifier + Send + Sync + 'static,
    K: Identifier + Send + Sync + 'static,
    V: 'static,
{
    /// Returns a builder; key functions and a fetch function are required.
    pub fn builder() -> KeyedProviderBuilder<Q, L, K, V> {
        KeyedProviderBuilder::new()
    }
}

impl<Q: fmt::Debug, L: Identifier, K: Identifier, V> KeyedProvider<Q, L, K, V> {
    /// Load key of `value`, if it has one.
    pub fn load_key(&self, value: &Q) -> Option<L> {
        (self.load_key)(value)
    }

    /// Cache key of `value`, if it has one.
    pub fn cache_key(&self, value: &Q) -> Option<K> {
        (self.cache_key)(value)
    }

    /// Registers `value` for the next flush.
    ///
    /// Returns `false` without registering anything if either key of
    /// `value` is `None`, or if its cache key is already known.
    pub fn register(&self, value: &Q) -> bool {
        let (Some(load_key), Some(cache_key)) = (self.load_key(value), self.cache_key(value)) else {
            trace!(provider = %self.provider.name(), value = ?value, "value has no key; not registered");
            return false;
        };
        self.load_keys
            .write()
            .entry(cache_key.clone())
            .or_insert(load_key);
        self.provider.register(cache_key)
    }

    /// Registers every value in `values`. Returns how many were new.
    pub fn register_many<'a, I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = &'a Q>,
        Q: 'a,
    {
        values.into_iter().filter(|value| self.register(value)).count()
    }

    /// Returns the value stored under `value`'s cache key, flushing pending
    /// cache keys first if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingItem`] if a key of `value` is `None` or the backend
    ///   omitted its cache key, and no fallback is configured.
    /// - [`Error::NotRegistered`] if `value` was never registered.
    /// - [`Error::FetchFailed`] if the flush covering `value` failed.
    pub fn resolve(&self, value: &Q) -> Result<Arc<V>> {
        let Some(cache_key) = self.cache_key(value) else {
            return self.empty(value);
        };
        if self.load_key(value).is_none() {
            return match self.provider.state(&cache_key) {
                Some(EntryState::Resolved(cached)) => Ok(cached),
                _ => self.empty(value),
            };
        }
        self.provider.resolve(&cache_key)
    }

    /// Fetches every pending cache key now. Returns how many were submitted.
    ///
    /// # Errors
    ///
    /// [`Error::FetchFailed`] if the bulk fetch failed.
    pub fn warm(&self) -> Result<usize> {
        self.provider.warm()
    }

    /// The provider holding values by cache key.
    pub fn provider(&self) -> &Provider<K, V> {
        &self.provider
    }

    fn empty(&self, value: &Q) -> Result<Arc<V>> {
        match self.provider.fallback() {
            Some(fallback) => Ok(Arc::clone(fallback)),
            None => Err(Error::missing_item(value)),
        }
    }
}

/// Configures and creates a [`KeyedProvider`].
pub struct KeyedProviderBuilder<Q, L, K, V> {
    provider: ProviderBuilder<K, V>,
    load_key: Option<KeyFn<Q, L>>,
    cache_key: Option<KeyFn<Q, K>>,
    fetch: Option<LoadFetch<L, K, V>>,
}

impl<Q, L, K, V> fmt::Debug for KeyedProviderBuilder<Q, L, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedProviderBuilder")
            .field("provider", &self.provider)
            .field("has_load_key", &self.load_key.is_some())
            .field("has_cache_key", &self.cache_key.is_some())
            .field("has_fetch", &self.fetch.is_some())
            .finish()
    }
}

impl<Q, L, K, V> Default for KeyedProviderBuilder<Q, L, K, V>
where
    Q: 'static,
    L: Identifier + Send + Sync + 'static,
    K: Identifier + Send + Sync + 'static,
    V: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, L, K, V> KeyedProviderBuilder<Q, L, K, V>
where
    Q: 'static,
    L: Identifier + Send + Sync + 'static,
    K: Identifier + Send + Sync + 'static,
    V: 'static,
{
    /// Creates a builder with default provider settings.
    pub fn new() -> Self {
        Self {
            provider: ProviderBuilder::new(),
            load_key: None,
            cache_key: None,
            fetch: None,
        }
    }

    /// Sets the name used in log events and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.provider = self.provider.name(name);
        self
    }

    /// Pre-sizes the cache-key table.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.provider = self.provider.capacity(capacity);
        self
    }

    /// Empty result: returned for values without a key and for cache keys
    /// the backend omitted.
    pub fn fallback(mut self, value: V) -> Self {
        self.provider = self.provider.fallback(value);
        self
    }

    /// Derives the backend load key of a value.
    pub fn load_key<F>(mut self, load_key: F) -> Self
    where
        F: Fn(&Q) -> Option<L> + Send + Sync + 'static,
    {
        self.load_key = Some(Arc::new(load_key));
        self
    }

    /// Derives the cache key of a value.
    pub fn cache_key<F>(mut self, cache_key: F) -> Self
    where
        F: Fn(&Q) -> Option<K> + Send + Sync + 'static,
    {
        self.cache_key = Some(Arc::new(cache_key));
        self
    }

    /// Sets the bulk fetch over load keys. The returned map is keyed by
    /// cache key.
    pub fn fetch_with<F>(mut self, fetch: F) -> Self
    where
        F: Fn(&[L]) -> FetchResult<K, V> + Send + Sync + 'static,
    {
        self.fetch = Some(Box::new(fetch));
        self
    }

    /// Builds the keyed provider.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. For a non-panicking
    /// alternative, use [`try_build`](Self::try_build).
    pub fn build(self) -> KeyedProvider<Q, L, K, V> {
        match self.try_build() {
            Ok(provider) => provider,
            Err(e) => panic!("{}", e),
        }
    }

    /// Builds the keyed provider, returning an error on invalid
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a key function or the fetch function is
    /// missing, or the provider name is empty.
    pub fn try_build(self) -> std::result::Result<KeyedProvider<Q, L, K, V>, ConfigError> {
        let load_key = self
            .load_key
            .ok_or_else(|| ConfigError::new("a load key function is required"))?;
        let cache_key = self
            .cache_key
            .ok_or_else(|| ConfigError::new("a cache key function is required"))?;
        let fetch = self
            .fetch
            .ok_or_else(|| ConfigError::new("a bulk fetch capability is required"))?;

        let load_keys: LoadKeys<K, L> = Arc::default();
        let provider = self
            .provider
            .fetcher(LoadKeyFetch {
                load_keys: Arc::clone(&load_keys),
                fetch,
            })
            .try_build()?;
        Ok(KeyedProvider {
            provider,
            load_key,
            cache_key,
            load_keys,
        })
    }
}

impl<Q, K, V> KeyedProviderBuilder<Q, K, K, V>
where
    Q: 'static,
    K: Identifier + Send + Sync + 'static,
    V: 'static,
{
    /// Uses one function for both the load key and the cache key.
    pub fn key<F>(mut self, key: F) -> Self
    where
        F: Fn(&Q) -> Option<K> + Send + Sync + 'static,
    {
        let key: KeyFn<Q, K> = Arc::new(key);
        self.load_key = Some(Arc::clone(&key));
        self.cache_key = Some(key);
        self
    }
}
