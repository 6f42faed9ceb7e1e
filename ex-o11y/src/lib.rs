//! # `ex-o11y`
//!
//! An observability toolkit built around a `Provider`/`Span`/`Trace` model,
//! distinct from (and layered on top of) ambient `tracing`-based logging.
//!
//! Unlike a `tracing::Span`, a [`span::Span`] here supports being flattened
//! into its parent's field set, or duplicated into a parallel "golden" trace
//! for isolating interesting events — neither of which map cleanly onto
//! `tracing`'s span tree, which is why this crate implements its own
//! abstraction rather than building directly on `tracing::Span`.
//!
//! `tracing`/`ex-logger` remain the ambient diagnostic logging layer; this
//! crate's own internal diagnostics (dropped exports, sampler warnings, etc)
//! are themselves logged through `tracing`.

#![forbid(unsafe_code)]

/// Ordered, trace-wide key/value metadata, propagated across process
/// boundaries via [`propagation`].
pub mod baggage;
/// Exporter pipeline: fan-out, sampling gate, batching, and backends.
pub mod export;
/// Descriptors that resolve a span's fields into emitted metrics.
pub mod metric;
/// Statsd-style metrics emitter.
pub mod metrics_emitter;
/// Cross-process propagation of trace context and baggage over HTTP headers.
pub mod propagation;
/// The [`Provider`](provider::Provider), the toolkit's top-level handle.
pub mod provider;
/// Deterministic, CRC32-based tail sampling.
pub mod sampler;
/// [`Span`](span::Span) lifecycle: fields, flatten, golden twins, metrics.
pub mod span;
/// [`Trace`](trace::Trace): the mutable field map shared by all spans in a
/// trace.
pub mod trace;
/// The [`Warning`](warning::Warning) error wrapper and `IsWarning` trait.
pub mod warning;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

pub use crate::{
    baggage::Baggage,
    propagation::PropagationCarrier,
    provider::Provider,
    span::Span,
    warning::Warning,
};

/// Configuration for a [`Provider`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Human-readable name for this service, used as the default `service`
    /// field on every span and as the default User-Agent component for the
    /// HTTP client built on top of this crate.
    pub service_name: String,
    /// Per-key sample rates for the tail sampler, keyed by span name: roughly
    /// 1-in-`rate` traces keyed under a given name are kept. A name with no
    /// entry here keeps everything for that key (rate 1).
    pub sample_rates: HashMap<String, u32>,
    /// Maximum number of spans buffered by the batch processor before a
    /// flush is forced.
    pub batch_max_spans: usize,
    /// Maximum delay between batch flushes.
    pub batch_max_delay: Duration,
    /// Endpoint the OTLP-style wire exporter posts trace batches to. `None`
    /// disables the wire exporter (spans are still sampled and counted).
    pub otlp_endpoint: Option<String>,
    /// `host:port` of a statsd-style UDP metrics collector. `None` disables
    /// metric emission.
    pub metrics_addr: Option<String>,
    /// Prepended as `<namespace>.<name>` to every emitted metric name. Empty
    /// disables the namespace component.
    pub metrics_namespace: String,
    /// `service.version` resource attribute attached to every batch the OTLP
    /// exporter ships.
    pub service_version: String,
    /// Optional dataset-routing attribute attached alongside `service.name`/
    /// `service.version` on every exported batch, for collectors that split
    /// traces across datasets per team or environment.
    pub dataset: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_owned(),
            sample_rates: HashMap::new(),
            batch_max_spans: 512,
            batch_max_delay: Duration::from_secs(2),
            otlp_endpoint: None,
            metrics_addr: None,
            metrics_namespace: String::new(),
            service_version: "0.0.0".to_owned(),
            dataset: None,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Config {
    /// A [`Config`] suited for tests: samples everything, has no exporters,
    /// and (combined with [`provider::Provider::for_testing`]) processes
    /// spans synchronously rather than via the background batch task.
    pub fn for_testing() -> Self {
        Self {
            service_name: "test-service".to_owned(),
            sample_rates: HashMap::new(),
            batch_max_spans: 1,
            batch_max_delay: Duration::from_millis(1),
            otlp_endpoint: None,
            metrics_addr: None,
            metrics_namespace: String::new(),
            service_version: "0.0.0-test".to_owned(),
            dataset: None,
        }
    }
}

/// Errors that can occur while constructing a [`Provider`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid OTLP endpoint URL: {0}")]
    InvalidOtlpEndpoint(#[source] url::ParseError),
    #[error("invalid metrics address: {0}")]
    InvalidMetricsAddr(#[source] std::io::Error),
}
