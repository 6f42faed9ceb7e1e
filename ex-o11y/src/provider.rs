//! The [`Provider`]: the toolkit's top-level handle. A factory for spans,
//! wired at construction time to an exporter pipeline, an optional metrics
//! emitter, and a mutable set of fields applied to every span it creates.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, Weak},
};

use tracing::warn;

use crate::{
    baggage::{self, Baggage},
    export::{self, Exporter, Pipeline},
    metric,
    metrics_emitter::Emitter,
    propagation::PropagationCarrier,
    sampler::Sampler,
    span::{Exported, FieldValue, Fields, Span},
    trace::Trace,
    Config, ConfigError,
};

/// Mirrors OpenTelemetry's `SpanKind`: recorded as a field only, it has no
/// effect on export or sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

/// Options recognised by [`Provider::start`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StartOptions {
    pub kind: SpanKind,
}

/// Carries the current span across an explicit call chain, plus (once
/// [`Provider::make_golden`] has been used somewhere upstream) the parallel
/// span in the golden trace.
///
/// This plays the role the spec's `ctx` parameter plays in the source
/// system: rather than a Go-style implicit context threaded through every
/// call automatically, it's an ordinary value the caller passes along -
/// more idiomatic for Rust, and it still satisfies the spec's "nil-safe"
/// requirement, since a default-constructed [`Context`] always behaves like
/// "no span installed" rather than panicking.
#[derive(Clone, Default)]
pub struct Context {
    span: Option<Span>,
    golden: Option<Span>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current span, if this context has one. Nil-safe: an empty
    /// [`Context`] simply returns `None`.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Builds a context that starts from an existing span, e.g. one handed
    /// back by [`Helpers::inject_propagation`].
    pub fn with_span(span: Span) -> Self {
        Self {
            span: Some(span),
            golden: None,
        }
    }
}

pub(crate) struct Inner {
    global_fields: Mutex<Fields>,
    sampler: Sampler,
    pipeline: Pipeline,
    metrics: Option<Emitter>,
}

impl Inner {
    pub(crate) fn global_fields_snapshot(&self) -> Fields {
        self.global_fields
            .lock()
            .expect("global field map mutex poisoned")
            .clone()
    }

    pub(crate) fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub(crate) fn export(&self, exported: Exported) {
        self.pipeline.push(exported);
    }

    pub(crate) fn emit_metric(&self, metric: metric::Resolved) {
        if let Some(metrics) = &self.metrics {
            metrics.emit(metric);
        }
    }
}

/// The toolkit's top-level handle: a factory for spans, wired to the
/// exporter pipeline, an optional metrics emitter, and a global field set.
///
/// Cheap to clone - clones share the same underlying pipeline, sampler, and
/// global field set.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<Inner>,
}

impl Default for Provider {
    /// The no-op provider: spans can be started and ended, fields recorded,
    /// and metrics declared exactly as with a fully configured provider, but
    /// nothing is ever exported or emitted. Safe to construct outside a
    /// Tokio runtime; this is the fallback a caller should reach for instead
    /// of a process-wide singleton when no provider has been installed.
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                global_fields: Mutex::new(HashMap::new()),
                sampler: Sampler::always_on(),
                pipeline: Pipeline::noop(),
                metrics: None,
            }),
        }
    }
}

impl Provider {
    /// Builds a live provider from `config`. Must be called from within a
    /// Tokio runtime: constructing the batch exporter task and the metrics
    /// UDP socket both require a reactor to register with.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let mut exporters: Vec<Arc<dyn Exporter>> = Vec::new();

        if let Some(endpoint) = &config.otlp_endpoint {
            let url =
                url::Url::parse(endpoint).map_err(ConfigError::InvalidOtlpEndpoint)?;
            exporters.push(Arc::new(export::otlp::OtlpExporter::new(
                url,
                config.service_name.clone(),
                config.service_version.clone(),
                config.dataset.clone(),
            )));
        }
        // The text exporter is always wired in: it's cheap (stdout), and
        // gives every deployment a human-readable fallback even when the
        // wire exporter is unconfigured or unreachable.
        exporters.push(Arc::new(export::text::TextExporter::stdout()));

        let metrics = config
            .metrics_addr
            .as_ref()
            .map(|addr| {
                let addr: SocketAddr = addr.parse().map_err(|e| {
                    ConfigError::InvalidMetricsAddr(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        e,
                    ))
                })?;
                Emitter::connect_with_namespace(addr, config.metrics_namespace.clone())
                    .map_err(ConfigError::InvalidMetricsAddr)
            })
            .transpose()?;

        let pipeline = Pipeline::new(exporters, config.batch_max_spans, config.batch_max_delay);
        let sampler = Sampler::by_name(config.sample_rates.clone());

        let mut global_fields = HashMap::new();
        global_fields.insert(
            "service".to_owned(),
            FieldValue::Str(config.service_name.clone()),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                global_fields: Mutex::new(global_fields),
                sampler,
                pipeline,
                metrics,
            }),
        })
    }

    /// A provider suited for tests: a synchronous in-memory [`Pipeline`] (no
    /// background task, no Tokio runtime required), no metrics emitter, and
    /// a sampler that keeps everything.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing() -> Self {
        Self::for_testing_with_sampler(Sampler::always_on())
    }

    /// Like [`Provider::for_testing`], but with a caller-supplied [`Sampler`]
    /// instead of one that keeps everything. Still the synchronous in-memory
    /// pipeline, so no Tokio runtime is required.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing_with_sampler(sampler: Sampler) -> Self {
        Self {
            inner: Arc::new(Inner {
                global_fields: Mutex::new(HashMap::new()),
                sampler,
                pipeline: Pipeline::for_testing(),
                metrics: None,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    // --- low-level span construction, bypassing Context ---

    /// Starts a new root span (the first span of a new trace).
    pub fn start_span(&self, name: impl Into<String>) -> Span {
        Span::new_root(name, self.downgrade())
    }

    /// Starts a span as a child of `parent`, in `parent`'s trace.
    pub fn start_child_span(&self, parent: &Span, name: impl Into<String>) -> Span {
        Span::new_child(name, parent)
    }

    // --- Context-carried API, mirroring the spec's `ctx`-based operations ---

    /// Attaches a new span to the trace rooted in `ctx`, applying `opts`.
    /// If `ctx` also carries a golden-trace span, a parallel child is forked
    /// there too, so the returned context's golden span stays in lock-step
    /// with the normal one.
    pub fn start(
        &self,
        ctx: &Context,
        name: impl Into<String>,
        opts: StartOptions,
    ) -> (Context, Span) {
        let name = name.into();
        let span = match ctx.span() {
            Some(parent) => self.start_child_span(parent, name.clone()),
            None => self.start_span(name.clone()),
        };
        span.add_raw_field("span.kind", opts.kind.as_str());

        let golden = ctx
            .golden
            .as_ref()
            .map(|golden_parent| self.start_child_span(golden_parent, name));

        let next_ctx = Context {
            span: Some(span.clone()),
            golden,
        };
        (next_ctx, span)
    }

    /// Retrieves the current span, or an absent marker if none was stored.
    /// Nil-safe: callers don't need to check whether a provider was ever
    /// installed.
    pub fn get_span<'a>(&self, ctx: &'a Context) -> Option<&'a Span> {
        ctx.span()
    }

    pub fn add_field(&self, ctx: &Context, key: impl Into<String>, value: impl crate::span::IntoField) {
        if let Some(span) = ctx.span() {
            span.add_field(key, value);
        }
    }

    pub fn add_field_to_trace(
        &self,
        ctx: &Context,
        key: impl Into<String>,
        value: impl crate::span::IntoField,
    ) {
        if let Some(span) = ctx.span() {
            span.add_field_to_trace(key, value);
        }
    }

    /// Adds a field to every future span this provider creates, process-wide.
    /// Fields are merged in at export time alongside each span's own and its
    /// trace's fields (see [`Span::end`]). A `None`-valued `value` is
    /// silently dropped, same as [`Span::add_field`].
    pub fn add_global_field(&self, key: impl Into<String>, value: impl crate::span::IntoField) {
        let Some(value) = value.into_field() else {
            return;
        };
        self.inner
            .global_fields
            .lock()
            .expect("global field map mutex poisoned")
            .insert(key.into(), value);
    }

    /// Convenience: starts a zero-duration span, records `fields`, and ends
    /// it immediately. Useful for one-shot log-style events that should
    /// still show up as spans in the exported trace.
    pub fn log(
        &self,
        ctx: &Context,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (String, FieldValue)>,
    ) {
        let (_ctx, span) = self.start(ctx, name, StartOptions::default());
        for (key, value) in fields {
            span.add_field(key, value);
        }
        span.end();
    }

    /// Elevates the current span's trace to golden: if `ctx` doesn't already
    /// carry a golden span, a new golden root is created, parallel to (but
    /// in a separate trace from) the current span. Every subsequent
    /// [`Provider::start`] call on the returned context forks a matching
    /// child on the golden side too.
    pub fn make_golden(&self, ctx: &Context) -> Context {
        if ctx.golden.is_some() {
            return ctx.clone();
        }

        // `Span::mark_golden` both creates the twin (in its own trace,
        // keeping the original span's name plus `meta.golden=true`) and
        // arranges for it to be ended alongside the original - so a single
        // `MakeSpanGolden` call produces exactly two connected trace ids,
        // the original's and the twin's, with no disconnected third root.
        let golden = match ctx.span() {
            Some(span) => Some(span.mark_golden()),
            None => Some(self.start_span("golden")),
        };

        Context {
            span: ctx.span.clone(),
            golden,
        }
    }

    /// Returns a propagation-focused sub-object; see [`Helpers`].
    pub fn helpers(&self) -> Helpers {
        Helpers {
            provider: self.clone(),
        }
    }

    /// Returns the underlying metrics emitter, for cases where a span's
    /// declared metrics aren't sufficient. `None` if this provider has no
    /// metrics backend configured.
    pub fn metrics_provider(&self) -> Option<Emitter> {
        self.inner.metrics.clone()
    }

    /// Flushes the exporter pipeline. Idempotent and safe to call more than
    /// once or after a cancelled await - there's nothing to undo if it's
    /// interrupted, only draining left to retry.
    pub async fn close(&self) {
        self.inner.pipeline.close().await;
    }

    /// Spans recorded so far by a provider built with [`Provider::for_testing`].
    #[cfg(any(test, feature = "test-utils"))]
    pub fn exported_spans(&self) -> Vec<Exported> {
        self.inner.pipeline.recorded()
    }
}

/// Propagation-focused operations: extracting the current trace context
/// (and baggage) into outgoing request headers, and reconstructing a
/// [`Context`] from incoming ones.
pub struct Helpers {
    provider: Provider,
}

impl Helpers {
    /// Builds the header map that should be attached to an outgoing request
    /// made from `ctx`, per §4.5 of the propagation contract: trace context,
    /// baggage, a `flatten` depth if the current span is flattened, and a
    /// `golden-*` baggage entry if `ctx` carries a golden span.
    pub fn extract_propagation(&self, ctx: &Context) -> http::HeaderMap {
        let mut baggage = Baggage::new();

        if let Some(span) = ctx.span() {
            let depth = span.flatten_depth();
            if depth > 0 {
                baggage.push(baggage::FLATTEN_KEY, depth.to_string());
            }
        }

        if let Some(golden) = &ctx.golden {
            let traceparent = format!("00-{}-{}-01", golden.trace_id(), golden.id());
            baggage.push(format!("{}traceparent", baggage::GOLDEN_PREFIX), traceparent);
        }

        let carrier = PropagationCarrier {
            parent: ctx.span().map(|span| (span.trace_id(), span.id())),
            tracestate: None,
            baggage,
        };

        let mut headers = http::HeaderMap::new();
        carrier.write_headers(&mut headers);
        headers
    }

    /// Reconstructs a [`Context`] from incoming request headers: extracts
    /// the trace context and baggage, starts a new root span (named `root`;
    /// callers are expected to rename it via `AddRawField("name", ...)`),
    /// re-applies any propagated flatten depth, and re-attaches a golden
    /// twin if golden baggage was present.
    pub fn inject_propagation(&self, headers: &http::HeaderMap) -> (Context, Span) {
        let carrier = PropagationCarrier::extract(headers);

        let span = match carrier.parent {
            Some((trace_id, _parent_span_id)) => crate::span::Span::new_with_trace(
                "root",
                Trace::with_id(trace_id),
                self.provider.downgrade(),
            ),
            None => self.provider.start_span("root"),
        };

        for entry in carrier.baggage.plain_entries() {
            span.add_field_to_trace(entry.key.replace('-', "_"), entry.value.clone());
        }

        if let Some(depth) = carrier.baggage.flatten_depth() {
            span.seed_flatten_depth(depth);
        }

        let (golden_entries, dropped) = carrier.baggage.golden_entries();
        if dropped > 0 {
            warn!(dropped, "golden baggage exceeded cap; entries dropped");
        }
        let golden = golden_entries
            .into_iter()
            .find(|(header, _)| *header == "traceparent")
            .and_then(|(_, value)| crate::propagation::parse_traceparent(value))
            .map(|(trace_id, _span_id)| {
                crate::span::Span::new_with_trace(
                    "root.golden",
                    Trace::with_id(trace_id),
                    self.provider.downgrade(),
                )
            });

        let ctx = Context {
            span: Some(span.clone()),
            golden,
        };
        (ctx, span)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Config;

    #[test]
    fn default_provider_is_safe_noop() {
        let provider = Provider::default();
        let span = provider.start_span("root");
        span.add_field("x", 1_i64);
        span.end();
        // No panics, nothing to assert on: there's no exporter installed.
    }

    #[test]
    fn context_round_trips_trace_id_across_propagation() {
        let provider = Provider::for_testing();
        let ctx = Context::new();
        let (ctx, span) = provider.start(&ctx, "outbound", StartOptions::default());
        let trace_id = span.trace_id();

        let headers = provider.helpers().extract_propagation(&ctx);
        let (_new_ctx, new_span) = provider.helpers().inject_propagation(&headers);

        assert_eq!(new_span.trace_id(), trace_id);
        span.end();
        new_span.end();
    }

    #[test]
    fn baggage_promotes_to_trace_fields_on_injection() {
        let provider = Provider::for_testing();
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::HeaderName::from_static("baggage"),
            http::HeaderValue::from_static("user-id=abc123"),
        );

        let (_ctx, span) = provider.helpers().inject_propagation(&headers);
        span.add_field("probe", true);
        span.end();

        let exported = provider.exported_spans();
        let exported = exported.iter().find(|s| s.name == "root").unwrap();
        assert_eq!(
            exported.fields.get("user_id"),
            Some(&FieldValue::Str("abc123".to_owned()))
        );
    }

    #[test]
    fn make_golden_forks_parallel_children() {
        let provider = Provider::for_testing();
        let ctx = Context::new();
        let (ctx, root) = provider.start(&ctx, "root", StartOptions::default());
        let golden_ctx = provider.make_golden(&ctx);

        let (next_ctx, child) = provider.start(&golden_ctx, "child", StartOptions::default());
        if let Some(golden_child) = &next_ctx.golden {
            golden_child.end();
        }
        let root_trace_id = root.trace_id();
        child.end();
        root.end();

        let exported = provider.exported_spans();
        assert!(exported
            .iter()
            .any(|s| s.name == "child" && s.trace_id != root_trace_id));
    }

    #[test]
    fn for_testing_config_forces_synchronous_processor() {
        let config = Config::for_testing();
        assert_eq!(config.batch_max_spans, 1);
    }

    #[tokio::test]
    async fn span_metric_reaches_statsd_sink_end_to_end() {
        let sink = crate::test_utils::FakeStatsdSink::bind().expect("bind local socket");
        let mut config = Config::for_testing();
        config.metrics_addr = Some(sink.addr().to_string());
        config.metrics_namespace = "ns".to_owned();
        let provider = Provider::new(config).expect("valid config with statsd configured");

        let root = provider.start_span("root");
        let sub = provider.start_child_span(&root, "sub");
        sub.record_metric(crate::metric::Descriptor::timer("sub-time"));
        sub.end();
        root.end();

        let line = sink.recv_line().expect("metric datagram received");
        assert!(line.starts_with("ns.sub-time:"));
        assert!(line.ends_with("|ms"));
    }

    #[tokio::test]
    async fn timer_and_count_skip_emission_when_their_value_field_is_unresolved() {
        let sink = crate::test_utils::FakeStatsdSink::bind().expect("bind local socket");
        let mut config = Config::for_testing();
        config.metrics_addr = Some(sink.addr().to_string());
        config.metrics_namespace = "ns".to_owned();
        let provider = Provider::new(config).expect("valid config with statsd configured");

        let mut timer = crate::metric::Descriptor::timer("checkout-time");
        timer.value_field = Some("missing".to_owned());
        let mut count = crate::metric::Descriptor::count("checkouts");
        count.value_field = Some("missing".to_owned());

        let span = provider.start_span("checkout");
        span.record_metric(timer);
        span.record_metric(count);
        // No `missing` field is ever set, so per spec §4.4 step 1 both
        // descriptors must be skipped entirely rather than falling back to
        // the span's elapsed time or a default count of 1.
        span.end();

        assert_eq!(
            sink.recv_line_timeout(std::time::Duration::from_millis(200)),
            None,
            "neither descriptor should have emitted"
        );
    }
}
