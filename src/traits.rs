//! # Bulk Fetch Contract
//!
//! This module defines the single capability the engine needs from an
//! integrator: given a batch of identifiers, return values for whichever of
//! them the backend could resolve.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────┐        ┌──────────────────────────────┐
//!   │  Container / Dispatcher /    │        │      BulkFetch<K, V>         │
//!   │  Aggregator                  │        │                              │
//!   │                              │        │  bulk_fetch(&[K])            │
//!   │   add / get / iter           │        │    → Ok(HashMap<K, V>)       │
//!   └──────────────┬───────────────┘        │    → Err(BoxError)           │
//!                  │                        └──────────────▲───────────────┘
//!                  ▼                                       │ one call per flush
//!   ┌──────────────────────────────┐                       │
//!   │        Provider<K, V>        │───────────────────────┘
//!   │  register / resolve /        │
//!   │  invalidate / set / warm     │
//!   │           │                  │
//!   │           ▼                  │
//!   │      Cache<K, V>             │
//!   └──────────────────────────────┘
//! ```
//!
//! ## Contract
//!
//! | Situation                        | Expected return                  | Engine reaction                |
//! |----------------------------------|----------------------------------|--------------------------------|
//! | every id found                   | `Ok(map)` with all ids           | all ids `Resolved`             |
//! | some ids unknown to the backend  | `Ok(map)` without those ids      | omitted ids `Missing`          |
//! | extra ids not requested          | `Ok(map)` with extras            | extras are ignored             |
//! | backend unavailable              | `Err(e)`                         | whole batch back to `Pending`  |
//!
//! The engine calls `bulk_fetch` on the thread that triggered the flush and
//! never holds its internal lock while doing so, so implementations may block
//! on I/O. Timeouts, retries and chunking of very large batches are the
//! implementation's business.
//!
//! ## Example Usage
//!
//! ```
//! use std::collections::HashMap;
//!
//! use flywheel::traits::{BulkFetch, FetchResult};
//! use flywheel::provider::Provider;
//!
//! struct Squares;
//!
//! impl BulkFetch<u64, u64> for Squares {
//!     fn bulk_fetch(&self, ids: &[u64]) -> FetchResult<u64, u64> {
//!         Ok(ids.iter().map(|id| (*id, id * id)).collect::<HashMap<_, _>>())
//!     }
//! }
//!
//! let provider: Provider<u64, u64> = Provider::new(Squares);
//! provider.register(4);
//! assert_eq!(*provider.resolve(&4).unwrap(), 16);
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::BoxError;

/// Result of one bulk fetch call.
pub type FetchResult<K, V> = Result<HashMap<K, V>, BoxError>;

/// Opaque identifier of one logical item.
///
/// Blanket-implemented for every `Eq + Hash + Clone + Debug` type; `Debug` is
/// used to name identifiers in errors and log events.
pub trait Identifier: Eq + Hash + Clone + Debug {}

impl<T> Identifier for T where T: Eq + Hash + Clone + Debug {}

/// Batched retrieval of item values.
///
/// Implemented automatically for closures of the shape
/// `Fn(&[K]) -> FetchResult<K, V>`.
pub trait BulkFetch<K, V>: Send + Sync {
    /// Fetches values for `ids`.
    ///
    /// `ids` never contains duplicates and is never empty. The returned map
    /// may cover any subset of `ids`; absent identifiers are recorded as
    /// missing. Returning `Err` fails the whole batch.
    fn bulk_fetch(&self, ids: &[K]) -> FetchResult<K, V>;
}

impl<K, V, F> BulkFetch<K, V> for F
where
    F: Fn(&[K]) -> FetchResult<K, V> + Send + Sync,
{
    #[inline]
    fn bulk_fetch(&self, ids: &[K]) -> FetchResult<K, V> {
        self(ids)
    }
}
