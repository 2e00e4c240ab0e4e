use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::{Settled, StateCounts};
use crate::metrics::snapshot::ProviderMetricsSnapshot;
use crate::metrics::traits::{FlushMetricsRecorder, MetricsReset};

/// Lock-free counters owned by one provider.
///
/// Counters are observational; `Relaxed` ordering is enough since nothing
/// synchronizes on them.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    resolve_hits: AtomicU64,
    resolve_misses: AtomicU64,
    resolve_waits: AtomicU64,
    flush_attempts: AtomicU64,
    fetch_calls: AtomicU64,
    fetch_failures: AtomicU64,
    ids_fetched: AtomicU64,
    resolved_total: AtomicU64,
    missing_total: AtomicU64,
    stale_results: AtomicU64,
    invalidations: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the counters and attaches the current state gauges.
    pub fn snapshot(&self, provider: &str, counts: StateCounts) -> ProviderMetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ProviderMetricsSnapshot {
            provider: provider.to_string(),
            resolve_hits: load(&self.resolve_hits),
            resolve_misses: load(&self.resolve_misses),
            resolve_waits: load(&self.resolve_waits),
            flush_attempts: load(&self.flush_attempts),
            fetch_calls: load(&self.fetch_calls),
            fetch_failures: load(&self.fetch_failures),
            ids_fetched: load(&self.ids_fetched),
            resolved_total: load(&self.resolved_total),
            missing_total: load(&self.missing_total),
            stale_results: load(&self.stale_results),
            invalidations: load(&self.invalidations),
            ..Default::default()
        }
        .with_counts(counts)
    }
}

impl FlushMetricsRecorder for ProviderMetrics {
    fn record_hit(&self) {
        bump(&self.resolve_hits);
    }

    fn record_miss(&self) {
        bump(&self.resolve_misses);
    }

    fn record_wait(&self) {
        bump(&self.resolve_waits);
    }

    fn record_flush_attempt(&self) {
        bump(&self.flush_attempts);
    }

    fn record_fetch(&self, batch_len: usize) {
        bump(&self.fetch_calls);
        add(&self.ids_fetched, batch_len);
    }

    fn record_fetch_failure(&self) {
        bump(&self.fetch_failures);
    }

    fn record_settled(&self, settled: &Settled) {
        add(&self.resolved_total, settled.resolved);
        add(&self.missing_total, settled.missing);
        add(&self.stale_results, settled.ignored);
    }

    fn record_invalidation(&self) {
        bump(&self.invalidations);
    }
}

impl MetricsReset for ProviderMetrics {
    fn reset_metrics(&self) {
        for counter in [
            &self.resolve_hits,
            &self.resolve_misses,
            &self.resolve_waits,
            &self.flush_attempts,
            &self.fetch_calls,
            &self.fetch_failures,
            &self.ids_fetched,
            &self.resolved_total,
            &self.missing_total,
            &self.stale_results,
            &self.invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
