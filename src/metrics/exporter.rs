use std::io::Write;

use parking_lot::Mutex;

use crate::metrics::snapshot::ProviderMetricsSnapshot;
use crate::metrics::traits::MetricsExporter;

/// Prometheus text exporter for provider metrics snapshots.
///
/// This exporter writes in the Prometheus text exposition format so it can be
/// scraped by Prometheus or forwarded to an OpenTelemetry collector. Each
/// sample carries a `provider` label.
#[derive(Debug)]
pub struct PrometheusTextExporter<W: Write + Send> {
    prefix: String,
    writer: Mutex<W>,
}

impl<W: Write + Send> PrometheusTextExporter<W> {
    pub fn new(prefix: impl Into<String>, writer: W) -> Self {
        Self {
            prefix: prefix.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_sample(&self, kind: &str, name: &str, provider: &str, value: u64) {
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "# TYPE {} {}", name, kind);
        let _ = writeln!(writer, "{}{{provider=\"{}\"}} {}", name, escape_label(provider), value);
    }

    fn write_counter(&self, suffix: &str, provider: &str, value: u64) {
        self.write_sample("counter", &self.metric_name(suffix), provider, value);
    }

    fn write_gauge(&self, suffix: &str, provider: &str, value: usize) {
        self.write_sample("gauge", &self.metric_name(suffix), provider, value as u64);
    }

    fn metric_name(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}_{}", self.prefix, suffix)
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl<W: Write + Send> MetricsExporter<ProviderMetricsSnapshot> for PrometheusTextExporter<W> {
    fn export(&self, snapshot: &ProviderMetricsSnapshot) {
        let p = snapshot.provider.as_str();
        self.write_counter("resolve_hits_total", p, snapshot.resolve_hits);
        self.write_counter("resolve_misses_total", p, snapshot.resolve_misses);
        self.write_counter("resolve_waits_total", p, snapshot.resolve_waits);
        self.write_counter("flush_attempts_total", p, snapshot.flush_attempts);
        self.write_counter("fetch_calls_total", p, snapshot.fetch_calls);
        self.write_counter("fetch_failures_total", p, snapshot.fetch_failures);
        self.write_counter("ids_fetched_total", p, snapshot.ids_fetched);
        self.write_counter("resolved_total", p, snapshot.resolved_total);
        self.write_counter("missing_total", p, snapshot.missing_total);
        self.write_counter("stale_results_total", p, snapshot.stale_results);
        self.write_counter("invalidations_total", p, snapshot.invalidations);
        self.write_gauge("pending", p, snapshot.pending);
        self.write_gauge("in_flight", p, snapshot.in_flight);
        self.write_gauge("resolved", p, snapshot.resolved);
        self.write_gauge("missing", p, snapshot.missing);
    }
}
