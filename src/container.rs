//! Ordered, restartable view over a set of identifiers bound to one provider.
//!
//! A container owns membership and order; values live in the provider's
//! cache. Iteration is lazy: nothing is fetched until the first element that
//! needs a value, and at that point every still-pending identifier of the
//! container goes out in one bulk fetch.
//!
//! ## Architecture
//!
//! ```text
//!   Container<K, V>
//!   ┌───────────────────────────────────────────┐
//!   │ order:   [k3, k1, k7, k2]   (add order)   │
//!   │ members: {k1, k2, k3, k7}   (FxHashSet)   │
//!   │ scope:   FlushScope::Container            │
//!   │ provider ─────────────────────────────────┼──► Provider<K, V> ──► Cache<K, V>
//!   └───────────────────────────────────────────┘          ▲
//!                                                          │ shared
//!   Container<K, V> (another use site) ────────────────────┘
//! ```
//!
//! ## Flush Scope
//!
//! - Iteration and [`Container::warm`] follow the container's
//!   [`FlushScope`]: by default only this container's pending identifiers are
//!   submitted, so unrelated containers sharing the provider are not pulled
//!   into the batch.
//! - [`Container::get`] delegates to [`Provider::resolve`] and therefore
//!   flushes everything pending in the provider.
//!
//! ## Example Usage
//!
//! ```
//! use std::collections::HashMap;
//!
//! use flywheel::error::Error;
//! use flywheel::provider::Provider;
//!
//! let provider = Provider::from_fn(|ids: &[u32]| {
//!     Ok(ids.iter().filter(|id| **id != 3).map(|id| (*id, id * 100)).collect::<HashMap<_, _>>())
//! });
//!
//! let mut container = provider.container();
//! container.extend([1, 2, 3]);
//!
//! let values: Vec<_> = container.iter().collect();
//! assert_eq!(**values[0].as_ref().unwrap(), 100);
//! assert_eq!(**values[1].as_ref().unwrap(), 200);
//! assert!(matches!(values[2], Err(Error::MissingItem { .. })));
//! ```

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::provider::{FlushScope, Provider, Scope};
use crate::traits::Identifier;

/// Ordered identifier collection bound to a [`Provider`].
pub struct Container<K, V> {
    provider: Provider<K, V>,
    order: Vec<K>,
    members: FxHashSet<K>,
    scope: FlushScope,
}

impl<K: Clone, V> Clone for Container<K, V> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            order: self.order.clone(),
            members: self.members.clone(),
            scope: self.scope,
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Container<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("provider", &self.provider.name())
            .field("ids", &self.order)
            .field("scope", &self.scope)
            .finish()
    }
}

impl<K: Identifier, V> Container<K, V> {
    /// Creates an empty container bound to `provider`.
    pub fn new(provider: &Provider<K, V>) -> Self {
        Self {
            provider: provider.clone(),
            order: Vec::new(),
            members: FxHashSet::default(),
            scope: FlushScope::default(),
        }
    }

    /// Sets which pending identifiers iteration flushes.
    pub fn with_flush_scope(mut self, scope: FlushScope) -> Self {
        self.scope = scope;
        self
    }

    /// Current flush scope.
    pub fn flush_scope(&self) -> FlushScope {
        self.scope
    }

    /// The provider this container is bound to.
    pub fn provider(&self) -> &Provider<K, V> {
        &self.provider
    }

    /// Registers `id` with the provider and appends it if not yet a member.
    ///
    /// Returns `true` if `id` was added to this container.
    pub fn add(&mut self, id: K) -> bool {
        self.provider.register(id.clone());
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push(id);
        true
    }

    /// Returns the value for `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInContainer`] if `id` was never added here, even if the
    ///   provider knows it through another container.
    /// - Any error of [`Provider::resolve`].
    pub fn get(&self, id: &K) -> Result<Arc<V>> {
        if !self.members.contains(id) {
            return Err(Error::not_in_container(id));
        }
        self.provider.resolve(id)
    }

    /// Lazily resolves every member in add order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            container: self,
            pos: 0,
        }
    }

    /// Resolves every member, stopping at the first error.
    pub fn values(&self) -> Result<Vec<Arc<V>>> {
        self.iter().collect()
    }

    /// Fetches this container's pending identifiers now (or the provider's,
    /// under [`FlushScope::Provider`]). Returns how many were submitted.
    ///
    /// # Errors
    ///
    /// [`Error::FetchFailed`] if the bulk fetch failed.
    pub fn warm(&self) -> Result<usize> {
        let candidates = match self.scope {
            FlushScope::Container => self.provider.cache().pending_among(&self.order),
            FlushScope::Provider => self.provider.cache().pending(),
        };
        self.provider.flush(candidates)
    }

    /// Members in add order.
    pub fn ids(&self) -> &[K] {
        &self.order
    }

    /// Returns `true` if `id` was added to this container.
    pub fn contains(&self, id: &K) -> bool {
        self.members.contains(id)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn resolve_at(&self, pos: usize) -> Option<Result<Arc<V>>> {
        let id = self.order.get(pos)?;
        let scope = match self.scope {
            FlushScope::Container => Scope::Keys(self.order.as_slice()),
            FlushScope::Provider => Scope::Provider,
        };
        Some(self.provider.resolve_scoped(id, scope))
    }
}

impl<K: Identifier, V> Extend<K> for Container<K, V> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for id in iter {
            self.add(id);
        }
    }
}

impl<'a, K: Identifier, V> IntoIterator for &'a Container<K, V> {
    type Item = Result<Arc<V>>;
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a container's values; see [`Container::iter`].
pub struct Iter<'a, K, V> {
    container: &'a Container<K, V>,
    pos: usize,
}

impl<K: Identifier, V> Iterator for Iter<'_, K, V> {
    type Item = Result<Arc<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.container.resolve_at(self.pos)?;
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.container.len().saturating_sub(self.pos);
        (remaining, Some(remaining))
    }
}

impl<K: Identifier, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K: Identifier, V> FusedIterator for Iter<'_, K, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn backend() -> MockBackend<u32, &'static str> {
        MockBackend::new([(1, "a"), (2, "b"), (3, "c"), (4, "d")])
    }

    fn provider(backend: &MockBackend<u32, &'static str>) -> Provider<u32, &'static str> {
        Provider::new(backend.clone())
    }

    fn unwrap_all(container: &Container<u32, &'static str>) -> Vec<&'static str> {
        container.iter().map(|v| *v.unwrap()).collect()
    }

    #[test]
    fn add_is_set_like_and_keeps_order() {
        let mut container = provider(&backend()).container();
        assert!(container.add(3));
        assert!(container.add(1));
        assert!(!container.add(3));
        assert_eq!(container.ids(), &[3, 1]);
        assert_eq!(container.len(), 2);
        assert!(container.contains(&1));
        assert!(!container.contains(&2));
    }

    #[test]
    fn debug_names_provider_and_members() {
        let provider = Provider::<u32, &'static str>::builder()
            .name("letters")
            .fetcher(backend())
            .build();
        let mut container = provider.container();
        container.extend([3, 1]);
        assert_eq!(
            format!("{container:?}"),
            r#"Container { provider: "letters", ids: [3, 1], scope: Container }"#
        );
    }

    #[test]
    fn nothing_is_fetched_until_first_access() {
        let backend = backend();
        let mut container = provider(&backend).container();
        container.extend([1, 2]);
        assert_eq!(backend.call_count(), 0);

        let mut iter = container.iter();
        assert_eq!(backend.call_count(), 0);
        iter.next();
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn iteration_is_restartable_without_refetch() {
        let backend = backend();
        let mut container = provider(&backend).container();
        container.extend([2, 1, 4]);

        assert_eq!(unwrap_all(&container), vec!["b", "a", "d"]);
        assert_eq!(unwrap_all(&container), vec!["b", "a", "d"]);
        assert_eq!(backend.calls(), vec![vec![2, 1, 4]]);
    }

    #[test]
    fn missing_member_surfaces_in_position() {
        let backend = backend();
        let mut container = provider(&backend).container();
        container.extend([1, 9, 2]);

        let results: Vec<_> = container.iter().collect();
        assert_eq!(**results[0].as_ref().unwrap(), "a");
        assert!(matches!(results[1], Err(Error::MissingItem { .. })));
        assert_eq!(**results[2].as_ref().unwrap(), "b");
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn get_rejects_non_members() {
        let backend = backend();
        let provider = provider(&backend);
        let mut first = provider.container();
        let second = provider.container();
        first.add(1);

        assert!(matches!(second.get(&1), Err(Error::NotInContainer { .. })));
        assert_eq!(*first.get(&1).unwrap(), "a");
    }

    #[test]
    fn iteration_flush_is_scoped_to_container() {
        let backend = backend();
        let provider = provider(&backend);
        let mut first = provider.container();
        let mut second = provider.container();
        first.extend([1, 2]);
        second.extend([3, 4]);

        first.values().unwrap();
        assert_eq!(backend.calls(), vec![vec![1, 2]]);
        second.values().unwrap();
        assert_eq!(backend.calls(), vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn provider_scope_pulls_in_everything_pending() {
        let backend = backend();
        let provider = provider(&backend);
        let mut first = provider.container().with_flush_scope(FlushScope::Provider);
        let mut second = provider.container();
        first.extend([1, 2]);
        second.extend([3]);

        first.values().unwrap();
        second.values().unwrap();
        assert_eq!(backend.calls(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn shared_cache_benefits_other_containers() {
        let backend = backend();
        let provider = provider(&backend);
        let mut first = provider.container();
        let mut second = provider.container();
        first.extend([1, 2]);
        first.values().unwrap();

        second.extend([2, 1]);
        assert_eq!(unwrap_all(&second), vec!["b", "a"]);
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn dropping_container_keeps_cache_entries() {
        let backend = backend();
        let provider = provider(&backend);
        {
            let mut container = provider.container();
            container.add(1);
            container.values().unwrap();
        }
        assert!(provider.state(&1).unwrap().is_terminal());
    }

    #[test]
    fn warm_submits_container_pending_only() {
        let backend = backend();
        let provider = provider(&backend);
        provider.register(4);
        let mut container = provider.container();
        container.extend([1, 2]);

        assert_eq!(container.warm().unwrap(), 2);
        assert_eq!(container.warm().unwrap(), 0);
        assert_eq!(provider.pending_len(), 1);
    }

    #[test]
    fn iterator_reports_exact_size() {
        let mut container = provider(&backend()).container();
        container.extend([1, 2, 3]);
        let mut iter = container.iter();
        assert_eq!(iter.len(), 3);
        iter.next();
        assert_eq!(iter.len(), 2);
    }

    #[test]
    fn for_loop_over_reference() {
        let mut container = provider(&backend()).container();
        container.extend([4, 3]);
        let mut seen = Vec::new();
        for value in &container {
            seen.push(*value.unwrap());
        }
        assert_eq!(seen, vec!["d", "c"]);
    }
}
