use crate::cache::StateCounts;

/// Point-in-time copy of one provider's counters plus state gauges.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProviderMetricsSnapshot {
    pub provider: String,

    pub resolve_hits: u64,
    pub resolve_misses: u64,
    pub resolve_waits: u64,

    pub flush_attempts: u64,
    pub fetch_calls: u64,
    pub fetch_failures: u64,
    pub ids_fetched: u64,

    pub resolved_total: u64,
    pub missing_total: u64,
    pub stale_results: u64, // results discarded because the entry changed mid-fetch
    pub invalidations: u64,

    // gauges captured at snapshot time
    pub pending: usize,
    pub in_flight: usize,
    pub resolved: usize,
    pub missing: usize,
}

impl ProviderMetricsSnapshot {
    /// Fraction of resolves served without a fetch or a wait.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.resolve_hits + self.resolve_misses + self.resolve_waits;
        if total == 0 {
            0.0
        } else {
            self.resolve_hits as f64 / total as f64
        }
    }

    /// Average identifiers per backend call.
    pub fn mean_batch_len(&self) -> f64 {
        if self.fetch_calls == 0 {
            0.0
        } else {
            self.ids_fetched as f64 / self.fetch_calls as f64
        }
    }

    pub(crate) fn with_counts(mut self, counts: StateCounts) -> Self {
        self.pending = counts.pending;
        self.in_flight = counts.in_flight;
        self.resolved = counts.resolved;
        self.missing = counts.missing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_handle_zero_denominators() {
        let snapshot = ProviderMetricsSnapshot::default();
        assert_eq!(snapshot.hit_ratio(), 0.0);
        assert_eq!(snapshot.mean_batch_len(), 0.0);
    }

    #[test]
    fn ratios() {
        let snapshot = ProviderMetricsSnapshot {
            resolve_hits: 3,
            resolve_misses: 1,
            fetch_calls: 2,
            ids_fetched: 10,
            ..Default::default()
        };
        assert_eq!(snapshot.hit_ratio(), 0.75);
        assert_eq!(snapshot.mean_batch_len(), 5.0);
    }
}
