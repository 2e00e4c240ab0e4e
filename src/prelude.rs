pub use crate::aggregator::Aggregator;
pub use crate::builder::ProviderBuilder;
pub use crate::cache::{EntryState, StateCounts};
pub use crate::container::Container;
pub use crate::dispatcher::Dispatcher;
pub use crate::error::{Error, Result};
pub use crate::keyed::KeyedProvider;
#[cfg(feature = "metrics")]
pub use crate::metrics::{MetricsExporter, PrometheusTextExporter, ProviderMetricsSnapshot};
pub use crate::provider::{FlushScope, Provider};
pub use crate::traits::{BulkFetch, FetchResult, Identifier};
