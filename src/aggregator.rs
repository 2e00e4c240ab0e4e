//! Combines values for one identifier from several providers.
//!
//! Each provider is bound to a route key (`R`). A router picks the routes an
//! identifier belongs to (all of them by default); registration is grouped
//! per route so every provider still sees one batch, and [`Aggregator::get`]
//! hands the per-route values to a combine function.
//!
//! An identifier the backend of one route omitted is left out of the slice
//! passed to the combine function rather than failing the whole lookup.
//!
//! ## Example Usage
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use flywheel::aggregator::Aggregator;
//! use flywheel::provider::Provider;
//!
//! let local = Provider::from_fn(|ids: &[&'static str]| {
//!     Ok(ids.iter().filter(|id| **id != "keitel").map(|id| (*id, 2usize)).collect::<HashMap<_, _>>())
//! });
//! let remote = Provider::from_fn(|ids: &[&'static str]| {
//!     Ok(ids.iter().map(|id| (*id, 1usize)).collect::<HashMap<_, _>>())
//! });
//!
//! let aggregator = Aggregator::new(|_: &&'static str, parts: &[(&'static str, Arc<usize>)]| {
//!     parts.iter().map(|(_, lines)| **lines).sum::<usize>()
//! })
//! .with_provider("local", local)
//! .with_provider("remote", remote);
//!
//! aggregator.register(["pryce", "keitel"]);
//! assert_eq!(aggregator.get(&"pryce").unwrap(), 3);
//! assert_eq!(aggregator.get(&"keitel").unwrap(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::traits::Identifier;

type Combine<R, K, V, A> = Box<dyn Fn(&K, &[(R, Arc<V>)]) -> A + Send + Sync>;
type Router<R, K> = Box<dyn Fn(&K) -> Vec<R> + Send + Sync>;

/// Fans an identifier out to several providers and merges the results.
pub struct Aggregator<R, K, V, A> {
    routes: Vec<R>,
    providers: FxHashMap<R, Provider<K, V>>,
    router: Option<Router<R, K>>,
    combine: Combine<R, K, V, A>,
}

impl<R: fmt::Debug, K, V, A> fmt::Debug for Aggregator<R, K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("routes", &self.routes)
            .field("has_router", &self.router.is_some())
            .finish()
    }
}

impl<R: Identifier, K: Identifier, V, A> Aggregator<R, K, V, A> {
    /// Creates an aggregator with no providers.
    pub fn new<F>(combine: F) -> Self
    where
        F: Fn(&K, &[(R, Arc<V>)]) -> A + Send + Sync + 'static,
    {
        Self {
            routes: Vec::new(),
            providers: FxHashMap::default(),
            router: None,
            combine: Box::new(combine),
        }
    }

    /// Binds `provider` to `route`. Routes are visited in the order they
    /// were first added.
    pub fn with_provider(mut self, route: R, provider: Provider<K, V>) -> Self {
        if self.providers.insert(route.clone(), provider).is_none() {
            self.routes.push(route);
        }
        self
    }

    /// Restricts each identifier to the routes `router` returns.
    pub fn with_router<F>(mut self, router: F) -> Self
    where
        F: Fn(&K) -> Vec<R> + Send + Sync + 'static,
    {
        self.router = Some(Box::new(router));
        self
    }

    /// Routes `id` is served by.
    pub fn routes_for(&self, id: &K) -> Vec<R> {
        match &self.router {
            Some(router) => router(id),
            None => self.routes.clone(),
        }
    }

    /// Groups `ids` by route, in first-seen route order.
    pub fn group_by_route<I>(&self, ids: I) -> Vec<(R, Vec<K>)>
    where
        I: IntoIterator<Item = K>,
    {
        let mut groups: Vec<(R, Vec<K>)> = Vec::new();
        let mut index: FxHashMap<R, usize> = FxHashMap::default();
        for id in ids {
            for route in self.routes_for(&id) {
                let slot = *index.entry(route.clone()).or_insert_with(|| {
                    groups.push((route, Vec::new()));
                    groups.len() - 1
                });
                groups[slot].1.push(id.clone());
            }
        }
        groups
    }

    /// Registers `ids` with every provider their routes name.
    ///
    /// Routes without a provider are skipped here and reported by
    /// [`get`](Self::get).
    pub fn register<I>(&self, ids: I)
    where
        I: IntoIterator<Item = K>,
    {
        for (route, group) in self.group_by_route(ids) {
            if let Some(provider) = self.providers.get(&route) {
                provider.register_many(group);
            }
        }
    }

    /// Resolves `id` on each of its routes and combines the values.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] if a route has no provider.
    /// - Any error of [`Provider::resolve`] other than
    ///   [`Error::MissingItem`].
    pub fn get(&self, id: &K) -> Result<A> {
        let mut parts = Vec::new();
        for route in self.routes_for(id) {
            let provider = self
                .providers
                .get(&route)
                .ok_or_else(|| Error::unknown_type(&route))?;
            match provider.resolve(id) {
                Ok(value) => parts.push((route, value)),
                Err(Error::MissingItem { .. }) => {},
                Err(err) => return Err(err),
            }
        }
        Ok((self.combine)(id, &parts))
    }

    /// The provider bound to `route`.
    pub fn provider(&self, route: &R) -> Option<&Provider<K, V>> {
        self.providers.get(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    type Lines = Vec<&'static str>;

    fn movie_lines() -> (
        Aggregator<&'static str, &'static str, Lines, Lines>,
        MockBackend<&'static str, Lines>,
        MockBackend<&'static str, Lines>,
    ) {
        let brazil = MockBackend::new([
            ("pryce", vec!["Triplets? My how time flies."]),
            ("de niro", vec!["Listen, kid, we're all in it together."]),
        ]);
        let taxi = MockBackend::new([
            ("de niro", vec!["You're only as healthy as you feel."]),
            ("keitel", vec!["You're a funny guy."]),
        ]);
        let aggregator = Aggregator::new(|_: &&'static str, parts: &[(&'static str, Arc<Lines>)]| {
            parts.iter().flat_map(|(_, lines)| lines.iter().copied()).collect()
        })
        .with_provider("brazil", Provider::new(brazil.clone()))
        .with_provider("taxi", Provider::new(taxi.clone()))
        .with_router(|name: &&'static str| match *name {
            "pryce" => vec!["brazil"],
            "keitel" => vec!["taxi"],
            _ => vec!["brazil", "taxi"],
        });
        (aggregator, brazil, taxi)
    }

    #[test]
    fn values_from_every_route_are_combined() {
        let (aggregator, brazil, taxi) = movie_lines();
        aggregator.register(["pryce", "keitel", "de niro"]);

        assert_eq!(aggregator.get(&"pryce").unwrap(), vec!["Triplets? My how time flies."]);
        assert_eq!(aggregator.get(&"keitel").unwrap(), vec!["You're a funny guy."]);
        assert_eq!(
            aggregator.get(&"de niro").unwrap(),
            vec!["Listen, kid, we're all in it together.", "You're only as healthy as you feel."]
        );
        assert_eq!(brazil.calls(), vec![vec!["pryce", "de niro"]]);
        assert_eq!(taxi.calls(), vec![vec!["keitel", "de niro"]]);
    }

    #[test]
    fn grouping_keeps_first_seen_route_order() {
        let (aggregator, _, _) = movie_lines();
        let groups = aggregator.group_by_route(["keitel", "pryce", "de niro"]);
        assert_eq!(
            groups,
            vec![("taxi", vec!["keitel", "de niro"]), ("brazil", vec!["pryce", "de niro"])]
        );
    }

    #[test]
    fn missing_on_one_route_is_skipped() {
        let (aggregator, _, _) = movie_lines();
        aggregator.register(["hepburn"]);
        assert!(aggregator.get(&"hepburn").unwrap().is_empty());
    }

    #[test]
    fn route_without_provider_is_unknown_type() {
        let aggregator: Aggregator<&'static str, u32, u32, usize> =
            Aggregator::new(|_: &u32, parts: &[(&'static str, Arc<u32>)]| parts.len())
                .with_router(|_: &u32| vec!["nowhere"]);
        aggregator.register([1]);
        assert!(matches!(aggregator.get(&1), Err(Error::UnknownType { .. })));
    }

    #[test]
    fn fetch_failure_propagates() {
        let backend = MockBackend::new([(1u32, 1u32)]);
        backend.fail_next(1);
        let aggregator = Aggregator::new(|_: &u32, parts: &[(u8, Arc<u32>)]| parts.len())
            .with_provider(0u8, Provider::new(backend.clone()));
        aggregator.register([1]);
        assert!(matches!(aggregator.get(&1), Err(Error::FetchFailed { .. })));
        assert_eq!(aggregator.get(&1).unwrap(), 1);
    }
}
