//! Routes identifiers to per-type providers.
//!
//! Heterogeneous identifiers are tagged with a logical type (`T`); each tag
//! owns a separate [`Provider`], so batching never mixes types and one type's
//! flush never submits another type's identifiers.
//!
//! ## Architecture
//!
//! ```text
//!   Dispatcher<T, K, V>
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ providers:  RwLock<FxHashMap<T, Provider<K, V>>>         │
//!   │ containers: Mutex<FxHashMap<T, Container<K, V>>>         │
//!   │ factory:    Option<Fn(&T) -> Option<Provider<K, V>>>     │
//!   └──────────────────────────────────────────────────────────┘
//!
//!   add("user", 7) ──► provider("user") ──► containers["user"].add(7)
//!   add("team", 7) ──► provider("team") ──► containers["team"].add(7)
//!                          │
//!                          └─ unknown tag: factory(tag), once per tag,
//!                             else UnknownType
//! ```
//!
//! ## Example Usage
//!
//! ```
//! use std::collections::HashMap;
//!
//! use flywheel::dispatcher::Dispatcher;
//! use flywheel::provider::Provider;
//!
//! let users = Provider::from_fn(|ids: &[u32]| {
//!     Ok(ids.iter().map(|id| (*id, format!("user {id}"))).collect::<HashMap<_, _>>())
//! });
//! let teams = Provider::from_fn(|ids: &[u32]| {
//!     Ok(ids.iter().map(|id| (*id, format!("team {id}"))).collect::<HashMap<_, _>>())
//! });
//!
//! let dispatcher = Dispatcher::new();
//! dispatcher.register_provider("user", users);
//! dispatcher.register_provider("team", teams);
//!
//! dispatcher.add("user", 1).unwrap();
//! dispatcher.add("team", 1).unwrap();
//!
//! assert_eq!(dispatcher.get(&"user", &1).unwrap().as_str(), "user 1");
//! assert_eq!(dispatcher.get(&"team", &1).unwrap().as_str(), "team 1");
//! assert!(dispatcher.add("org", 1).is_err());
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::traits::Identifier;

type ProviderFactory<T, K, V> = Box<dyn Fn(&T) -> Option<Provider<K, V>> + Send + Sync>;

/// Per-type router over [`Provider`]s.
pub struct Dispatcher<T, K, V> {
    providers: RwLock<FxHashMap<T, Provider<K, V>>>,
    containers: Mutex<FxHashMap<T, Container<K, V>>>,
    factory: Option<ProviderFactory<T, K, V>>,
}

impl<T: fmt::Debug, K, V> fmt::Debug for Dispatcher<T, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers = self.providers.read();
        f.debug_struct("Dispatcher")
            .field("tags", &providers.keys().collect::<Vec<_>>())
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

impl<T: Identifier, K: Identifier, V> Default for Dispatcher<T, K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Identifier, K: Identifier, V> Dispatcher<T, K, V> {
    /// Creates a dispatcher with no providers and no factory.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(FxHashMap::default()),
            containers: Mutex::new(FxHashMap::default()),
            factory: None,
        }
    }

    /// Creates a dispatcher that builds the provider for an unseen tag on
    /// first use.
    ///
    /// `factory` runs at most once per tag; returning `None` rejects the tag
    /// with [`Error::UnknownType`]. It runs under the provider table's write
    /// lock and must not call back into this dispatcher.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&T) -> Option<Provider<K, V>> + Send + Sync + 'static,
    {
        Self {
            factory: Some(Box::new(factory)),
            ..Self::new()
        }
    }

    /// Binds `provider` to `tag`, returning the provider it replaces.
    ///
    /// Identifiers accumulated for `tag` under a replaced provider are
    /// dropped from the tag's container.
    pub fn register_provider(&self, tag: T, provider: Provider<K, V>) -> Option<Provider<K, V>> {
        debug!(tag = ?tag, provider = %provider.name(), "provider registered");
        let previous = self.providers.write().insert(tag.clone(), provider);
        if previous.is_some() {
            self.containers.lock().remove(&tag);
        }
        previous
    }

    /// Returns the provider for `tag`, creating it through the factory if
    /// needed.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] if no provider is bound to `tag` and the
    /// factory (if any) declined it.
    pub fn provider(&self, tag: &T) -> Result<Provider<K, V>> {
        if let Some(provider) = self.providers.read().get(tag) {
            return Ok(provider.clone());
        }
        let factory = self.factory.as_ref().ok_or_else(|| Error::unknown_type(tag))?;

        let mut providers = self.providers.write();
        if let Some(provider) = providers.get(tag) {
            return Ok(provider.clone());
        }
        let provider = factory(tag).ok_or_else(|| Error::unknown_type(tag))?;
        debug!(tag = ?tag, provider = %provider.name(), "provider created by factory");
        providers.insert(tag.clone(), provider.clone());
        Ok(provider)
    }

    /// Registers `id` with the provider for `tag` and records it in that
    /// tag's container.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] if `tag` has no provider.
    pub fn add(&self, tag: T, id: K) -> Result<()> {
        let provider = self.provider(&tag)?;
        self.containers
            .lock()
            .entry(tag)
            .or_insert_with(|| provider.container())
            .add(id);
        Ok(())
    }

    /// Adds every `(tag, id)` pair, grouping by tag so each provider is
    /// looked up once. Returns how many pairs were added.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] for the first tag without a provider; pairs of
    /// tags resolved before it are kept.
    pub fn add_many<I>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = (T, K)>,
    {
        let mut order: Vec<T> = Vec::new();
        let mut groups: FxHashMap<T, Vec<K>> = FxHashMap::default();
        for (tag, id) in items {
            groups
                .entry(tag.clone())
                .or_insert_with(|| {
                    order.push(tag);
                    Vec::new()
                })
                .push(id);
        }

        let mut added = 0;
        for tag in order {
            let provider = self.provider(&tag)?;
            let ids = groups.remove(&tag).unwrap_or_default();
            added += ids.len();
            self.containers
                .lock()
                .entry(tag)
                .or_insert_with(|| provider.container())
                .extend(ids);
        }
        Ok(added)
    }

    /// Returns a container holding every identifier added for `tag` so far,
    /// or an empty one bound to the tag's provider.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] if `tag` has no provider.
    pub fn container_for(&self, tag: &T) -> Result<Container<K, V>> {
        let provider = self.provider(tag)?;
        let containers = self.containers.lock();
        Ok(containers
            .get(tag)
            .cloned()
            .unwrap_or_else(|| provider.container()))
    }

    /// Resolves `id` through the provider for `tag`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] if `tag` has no provider, otherwise any error
    /// of [`Provider::resolve`].
    pub fn get(&self, tag: &T, id: &K) -> Result<Arc<V>> {
        self.provider(tag)?.resolve(id)
    }

    /// Stores `value` for `id` in the provider for `tag`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] if `tag` has no provider.
    pub fn set(&self, tag: &T, id: K, value: V) -> Result<()> {
        self.provider(tag)?.set(id, value);
        Ok(())
    }

    /// Tags that currently have a provider.
    pub fn tags(&self) -> Vec<T> {
        self.providers.read().keys().cloned().collect()
    }
}
