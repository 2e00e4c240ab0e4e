//! # Metrics Traits
//!
//! Recording, snapshotting and export are split into small traits so the
//! flush path only ever sees a recorder, while monitoring code only ever
//! sees snapshots.
//!
//! ## Architecture
//!
//! ```text
//!   Provider::resolve / flush / invalidate
//!            │
//!            ▼
//!   ┌──────────────────────────┐
//!   │   FlushMetricsRecorder   │   &self, lock-free (atomics)
//!   │ hit/miss/wait/fetch/...  │
//!   └────────────┬─────────────┘
//!                │
//!   Consumption (decoupled from recording):
//!   ┌──────────────────────────────┐    ┌──────────────────────────────┐
//!   │ MetricsSnapshotProvider<S>   │    │ MetricsExporter<S>           │
//!   │ (bench/test)                 │    │ (production monitoring)      │
//!   └──────────────────────────────┘    └──────────────────────────────┘
//! ```
//!
//! Recorders take `&self`: providers are shared across threads and the
//! counters are updated outside the cache lock.

use crate::cache::Settled;

/// Counters updated by a provider while it resolves and flushes.
pub trait FlushMetricsRecorder {
    /// A resolve found its value already cached.
    fn record_hit(&self);
    /// A resolve found its identifier pending and started a flush.
    fn record_miss(&self);
    /// A resolve blocked on another caller's in-flight fetch.
    fn record_wait(&self);
    /// A flush tried to claim a non-empty candidate set.
    fn record_flush_attempt(&self);
    /// One backend call was issued for `batch_len` identifiers.
    fn record_fetch(&self, batch_len: usize);
    /// A backend call failed or panicked.
    fn record_fetch_failure(&self);
    /// A backend call returned and its results were applied.
    fn record_settled(&self, settled: &Settled);
    /// An identifier was forced back to pending.
    fn record_invalidation(&self);
}

/// Snapshot provider for bench/testing.
pub trait MetricsSnapshotProvider<S> {
    fn snapshot(&self) -> S;
}

/// Reset metrics between tests or benchmark iterations.
pub trait MetricsReset {
    fn reset_metrics(&self);
}

/// Export/publish metrics to production monitoring backends.
pub trait MetricsExporter<S> {
    fn export(&self, snapshot: &S);
}
