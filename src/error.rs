//! Error types for the flywheel library.
//!
//! ## Key Components
//!
//! - [`Error`]: Returned by provider, container, dispatcher and aggregator
//!   operations when an item cannot be produced.
//! - [`ConfigError`]: Returned when a builder is given invalid parameters
//!   (e.g. no fetch capability, empty provider name).
//! - [`InvariantError`]: Returned when internal cache invariants are violated
//!   (debug-only `check_invariants` methods).
//!
//! ## Error Kinds
//!
//! | Variant                | Retryable | Cause                                         |
//! |------------------------|-----------|-----------------------------------------------|
//! | `MissingItem`          | after `invalidate` | backend answered, but omitted the id |
//! | `FetchFailed`          | yes       | the whole bulk fetch call failed              |
//! | `NotInContainer`       | no        | id was never added to the queried container   |
//! | `NotRegistered`        | no        | id was never registered with the provider     |
//! | `UnknownType`          | no        | dispatcher has no provider for the type tag   |
//! | `DoubleClaimViolation` | no        | cache transition bypassed the claim step      |
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
//!     Ok(ids.iter().filter(|id| **id != 3).map(|id| (*id, id * 10)).collect::<HashMap<_, _>>())
//! });
//! provider.register(3);
//!
//! let err = provider.resolve(&3).unwrap_err();
//! assert!(matches!(err, Error::MissingItem { .. }));
//! assert!(!err.is_retryable());
//! ```

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a bulk fetch implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared form of a bulk fetch error, cloned to every caller observing it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors surfaced while resolving items.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The backend was asked for this identifier and did not return it.
    #[error("item {key} was not returned by the backend")]
    MissingItem { key: String },

    /// The bulk fetch call itself failed; every identifier in the batch is
    /// pending again.
    #[error("bulk fetch of {batch_len} item(s) failed: {source}")]
    FetchFailed {
        batch_len: usize,
        #[source]
        source: SharedError,
    },

    /// The identifier was never added to the container being queried.
    #[error("item {key} was never added to this container")]
    NotInContainer { key: String },

    /// The identifier was never registered with the provider.
    #[error("attempting to resolve unregistered item {key}")]
    NotRegistered { key: String },

    /// No provider is registered (or can be created) for the type tag.
    #[error("no provider registered for type {tag}")]
    UnknownType { tag: String },

    /// A cache transition skipped the claim step. Indicates a bug.
    #[error("cache transition for {key} bypassed the claim step (state: {state})")]
    DoubleClaimViolation { key: String, state: &'static str },
}

impl Error {
    pub(crate) fn missing_item(key: &impl fmt::Debug) -> Self {
        Self::MissingItem {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn not_in_container(key: &impl fmt::Debug) -> Self {
        Self::NotInContainer {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn not_registered(key: &impl fmt::Debug) -> Self {
        Self::NotRegistered {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn unknown_type(tag: &impl fmt::Debug) -> Self {
        Self::UnknownType {
            tag: format!("{tag:?}"),
        }
    }

    pub(crate) fn double_claim(key: &impl fmt::Debug, state: &'static str) -> Self {
        Self::DoubleClaimViolation {
            key: format!("{key:?}"),
            state,
        }
    }

    /// Returns `true` if retrying the same access may succeed without any
    /// other intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }
}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Produced by debug-only `check_invariants` methods
/// (e.g. [`Cache::check_invariants`](crate::cache::Cache::check_invariants)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when builder parameters are invalid.
///
/// Produced by [`ProviderBuilder::try_build`](crate::builder::ProviderBuilder::try_build).
///
/// # Example
///
/// ```
/// use flywheel::builder::ProviderBuilder;
///
/// let err = ProviderBuilder::<u64, String>::new().try_build().unwrap_err();
/// assert!(err.to_string().contains("fetch"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Error ------------------------------------------------------------

    #[test]
    fn missing_item_names_key() {
        let err = Error::missing_item(&"user:7");
        assert_eq!(
            err.to_string(),
            "item \"user:7\" was not returned by the backend"
        );
    }

    #[test]
    fn fetch_failed_exposes_source() {
        let source: SharedError = Arc::from(BoxError::from("connection reset"));
        let err = Error::FetchFailed {
            batch_len: 3,
            source,
        };
        assert!(err.to_string().contains("3 item(s)"));
        let inner = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(inner.as_deref(), Some("connection reset"));
    }

    #[test]
    fn only_fetch_failures_are_retryable() {
        let source: SharedError = Arc::from(BoxError::from("x"));
        assert!(Error::FetchFailed {
            batch_len: 1,
            source
        }
        .is_retryable());
        assert!(!Error::missing_item(&1).is_retryable());
        assert!(!Error::not_in_container(&1).is_retryable());
        assert!(!Error::not_registered(&1).is_retryable());
        assert!(!Error::unknown_type(&"users").is_retryable());
        assert!(!Error::double_claim(&1, "pending").is_retryable());
    }

    #[test]
    fn double_claim_reports_state() {
        let err = Error::double_claim(&42u32, "resolved");
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("resolved"));
    }

    #[test]
    fn error_is_send_sync_and_clone() {
        fn assert_traits<T: Send + Sync + Clone + std::error::Error>() {}
        assert_traits::<Error>();
    }

    // -- InvariantError ---------------------------------------------------

    #[test]
    fn invariant_display_shows_message() {
        let err = InvariantError::new("pending count mismatch");
        assert_eq!(err.to_string(), "pending count mismatch");
        assert_eq!(err.message(), "pending count mismatch");
    }

    #[test]
    fn invariant_clone_and_eq() {
        let a = InvariantError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("name must not be empty");
        assert_eq!(err.to_string(), "name must not be empty");
        assert_eq!(err.message(), "name must not be empty");
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }
}
