//! Builder for [`Provider`] configuration.
//!
//! ## Options
//!
//! | Option       | Default      | Description                                     |
//! |--------------|--------------|-------------------------------------------------|
//! | `name`       | `"provider"` | Label used in log events and metric names       |
//! | `capacity`   | `0`          | Pre-sized slot count for the identifier cache   |
//! | `fallback`   | none         | Value returned instead of `MissingItem`         |
//! | fetcher      | required     | `fetcher(impl BulkFetch)` or `fetch_with(closure)` |
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use flywheel::builder::ProviderBuilder;
//!
//! let provider = ProviderBuilder::new()
//!     .name("users")
//!     .capacity(1024)
//!     .fallback(String::from("<unknown>"))
//!     .fetch_with(|ids: &[u64]| {
//!         Ok(ids.iter().filter(|id| **id < 10).map(|id| (*id, format!("user {id}"))).collect::<HashMap<_, _>>())
//!     })
//!     .build();
//!
//! provider.register_many([1, 99]);
//! assert_eq!(provider.resolve(&1).unwrap().as_str(), "user 1");
//! assert_eq!(provider.resolve(&99).unwrap().as_str(), "<unknown>");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::provider::Provider;
use crate::traits::{BulkFetch, FetchResult, Identifier};

/// Default provider name.
pub const DEFAULT_PROVIDER_NAME: &str = "provider";

/// Configures and creates a [`Provider`].
pub struct ProviderBuilder<K, V> {
    name: String,
    capacity: usize,
    fallback: Option<V>,
    fetcher: Option<Box<dyn BulkFetch<K, V>>>,
}

impl<K, V> fmt::Debug for ProviderBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBuilder")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("has_fallback", &self.fallback.is_some())
            .field("has_fetcher", &self.fetcher.is_some())
            .finish()
    }
}

impl<K: Identifier, V> Default for ProviderBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Identifier, V> ProviderBuilder<K, V> {
    /// Creates a builder with default settings and no fetcher.
    pub fn new() -> Self {
        Self {
            name: DEFAULT_PROVIDER_NAME.to_string(),
            capacity: 0,
            fallback: None,
            fetcher: None,
        }
    }

    /// Sets the name used in log events and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Pre-sizes the identifier cache.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Returns `value` for identifiers the backend omitted instead of
    /// failing with `MissingItem`.
    pub fn fallback(mut self, value: V) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Sets the bulk fetch implementation.
    pub fn fetcher(mut self, fetcher: impl BulkFetch<K, V> + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    /// Sets the bulk fetch implementation from a closure.
    pub fn fetch_with<F>(self, fetch: F) -> Self
    where
        F: Fn(&[K]) -> FetchResult<K, V> + Send + Sync + 'static,
    {
        self.fetcher(fetch)
    }

    /// Builds the provider.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. For a non-panicking
    /// alternative, use [`try_build`](Self::try_build).
    pub fn build(self) -> Provider<K, V> {
        match self.try_build() {
            Ok(provider) => provider,
            Err(e) => panic!("{}", e),
        }
    }

    /// Builds the provider, returning an error on invalid configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if no fetch capability was supplied or the
    /// name is empty.
    pub fn try_build(self) -> Result<Provider<K, V>, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::new("provider name must not be empty"));
        }
        let fetcher = self
            .fetcher
            .ok_or_else(|| ConfigError::new("a bulk fetch capability is required"))?;
        Ok(Provider::from_parts(
            self.name,
            self.capacity,
            fetcher,
            self.fallback.map(Arc::new),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::Error;

    fn echo(ids: &[u32]) -> FetchResult<u32, u32> {
        Ok(ids.iter().map(|id| (*id, *id)).collect::<HashMap<_, _>>())
    }

    #[test]
    fn defaults() {
        let provider = ProviderBuilder::new().fetch_with(echo).build();
        assert_eq!(provider.name(), DEFAULT_PROVIDER_NAME);
        assert!(provider.is_empty());
    }

    #[test]
    fn name_is_applied() {
        let provider = ProviderBuilder::new().name("orders").fetch_with(echo).build();
        assert_eq!(provider.name(), "orders");
    }

    #[test]
    fn missing_fetcher_is_rejected() {
        let err = ProviderBuilder::<u32, u32>::new().try_build().unwrap_err();
        assert!(err.message().contains("bulk fetch"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = ProviderBuilder::new()
            .name("  ")
            .fetch_with(echo)
            .try_build()
            .unwrap_err();
        assert!(err.message().contains("name"));
    }

    #[test]
    #[should_panic(expected = "bulk fetch capability")]
    fn build_panics_without_fetcher() {
        let _ = ProviderBuilder::<u32, u32>::new().build();
    }

    #[test]
    fn fallback_only_applies_to_missing_items() {
        let provider = ProviderBuilder::new()
            .fallback(0)
            .fetch_with(|ids: &[u32]| {
                Ok(ids.iter().filter(|id| **id != 2).map(|id| (*id, id * 10)).collect::<HashMap<_, _>>())
            })
            .build();
        provider.register_many([1, 2]);
        assert_eq!(*provider.resolve(&1).unwrap(), 10);
        assert_eq!(*provider.resolve(&2).unwrap(), 0);
        assert!(matches!(provider.resolve(&3), Err(Error::NotRegistered { .. })));
    }
}
