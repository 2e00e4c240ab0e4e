//! Provider counters and their export (feature `metrics`).
//!
//! Every [`Provider`](crate::provider::Provider) owns a [`ProviderMetrics`];
//! [`Provider::metrics_snapshot`](crate::provider::Provider::metrics_snapshot)
//! copies it together with the current state gauges, and an exporter such as
//! [`PrometheusTextExporter`] publishes the snapshot.

pub mod exporter;
pub mod metrics_impl;
pub mod snapshot;
pub mod traits;

pub use exporter::PrometheusTextExporter;
pub use metrics_impl::ProviderMetrics;
pub use snapshot::ProviderMetricsSnapshot;
pub use traits::{FlushMetricsRecorder, MetricsExporter, MetricsReset, MetricsSnapshotProvider};
