//! flywheel: lazy bulk fetching with a shared per-provider cache.
//!
//! Callers register identifiers as they discover them; nothing touches the
//! backend until the first value is needed, and then every identifier still
//! pending goes out in a single [`BulkFetch::bulk_fetch`](traits::BulkFetch)
//! call. Results stay cached for the life of the provider.
//!
//! ## Components
//!
//! ```text
//!   Dispatcher<T, K, V> ── tag ──► Provider<K, V> ◄── route ── Aggregator<R, K, V, A>
//!                                    │        ▲
//!                       owns         │        │ bound to
//!                                    ▼        │
//!                               Cache<K, V>  Container<K, V>
//!                                    │
//!                                    ▼
//!                          Box<dyn BulkFetch<K, V>>
//! ```
//!
//! | Module         | Role                                                   |
//! |----------------|--------------------------------------------------------|
//! | [`cache`]      | Identifier state machine, claims, waiter wake-up       |
//! | [`provider`]   | Flush protocol, fallback, overrides                    |
//! | [`container`]  | Ordered membership and lazy iteration                  |
//! | [`dispatcher`] | Per-type routing, lazy provider factory                |
//! | [`aggregator`] | Fan-out to several providers and combine               |
//! | [`keyed`]      | Computed load and cache keys over a provider           |
//! | [`builder`]    | Provider configuration                                 |
//! | [`testing`]    | Recording in-memory backend                            |
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//!
//! use flywheel::prelude::*;
//!
//! let provider = Provider::from_fn(|ids: &[u32]| {
//!     Ok(ids.iter().map(|id| (*id, id.to_string())).collect::<HashMap<_, _>>())
//! });
//!
//! let mut page = provider.container();
//! page.extend([4, 8, 15]);
//!
//! let rendered: Vec<String> = page.iter().map(|v| v.unwrap().to_string()).collect();
//! assert_eq!(rendered, ["4", "8", "15"]);
//! ```
//!
//! Logging goes through [`tracing`]; install a subscriber to see flush and
//! failure events.

pub mod aggregator;
pub mod builder;
pub mod cache;
pub mod container;
pub mod dispatcher;
pub mod error;
pub mod keyed;

#[cfg(feature = "metrics")]
pub mod metrics;

pub mod prelude;
pub mod provider;
pub mod testing;
pub mod traits;
