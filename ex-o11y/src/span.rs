//! [`Span`] lifecycle: field recording, flatten-into-parent, golden twins,
//! and metric resolution on [`Span::end`].

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};

use tracing::warn;

use crate::{
    metric::{self, Descriptor},
    provider::Inner as ProviderInner,
    sampler::SampleInput,
    trace::{SpanId, Trace, TraceId},
    warning::IsWarning,
};

/// A closed set of value types a span field can hold.
///
/// [`FieldValue::Rendered`] is the fallback for values that don't fit one of
/// the structured variants: it is computed eagerly (via `Display`) at the
/// call site, so the span doesn't need to hold a trait object or generic
/// parameter just to record it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    I64(i64),
    F64(f64),
    Duration(Duration),
    Rendered(String),
}

impl FieldValue {
    /// Renders this value the way it would appear in a text export line or
    /// log message.
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::I64(i) => i.to_string(),
            Self::F64(f) => f.to_string(),
            Self::Duration(d) => format!("{:.3}ms", d.as_secs_f64() * 1000.0),
            Self::Rendered(s) => s.clone(),
        }
    }

    /// The value as an `f64`, for metric/gauge/histogram resolution, per
    /// spec §4.4 step 2's coercion rule: integers and floats pass through,
    /// durations convert to milliseconds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I64(i) => Some(*i as f64),
            Self::F64(f) => Some(*f),
            Self::Duration(d) => Some(d.as_secs_f64() * 1000.0),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}
impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}
impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}
impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}
impl From<Duration> for FieldValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

/// Converts a value into an optional field, so a field write with a `None`
/// (or `None`-valued pointer-like) argument is silently dropped rather than
/// requiring a guard at every call site. Blanket-implemented for anything
/// that already converts to a [`FieldValue`], and for `Option` of the same.
pub trait IntoField {
    fn into_field(self) -> Option<FieldValue>;
}

impl<T: Into<FieldValue>> IntoField for T {
    fn into_field(self) -> Option<FieldValue> {
        Some(self.into())
    }
}

impl<T: Into<FieldValue>> IntoField for Option<T> {
    fn into_field(self) -> Option<FieldValue> {
        self.map(Into::into)
    }
}

/// A field map recorded by a span. Insertion order is not preserved (a
/// `HashMap` is sufficient: exporters don't depend on field order).
pub type Fields = HashMap<String, FieldValue>;

/// A span that has ended and been selected for export by the
/// [`Sampler`](crate::sampler::Sampler), ready to hand to the
/// [`export`](crate::export) pipeline.
#[derive(Clone, Debug)]
pub struct Exported {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub name: String,
    pub start_unix_nanos: u128,
    pub duration: Duration,
    pub fields: Fields,
}

/// The ancestor a flattened span merges its fields into, plus the prefix
/// those fields are recorded under. Nested flattens compose their prefixes so
/// a grandchild flattened twice still lands on the first non-flattened
/// ancestor's own field map.
#[derive(Clone)]
struct FlattenTarget {
    fields: Arc<Mutex<Fields>>,
    prefix: String,
}

struct Inner {
    id: SpanId,
    name: String,
    trace: Arc<Trace>,
    start: Instant,
    start_unix_nanos: u128,
    fields: Arc<Mutex<Fields>>,
    /// Lazily created on first [`Span::mark_golden`] or
    /// [`Span::add_golden_field`] call. Once created, the same twin `Span`
    /// is reused and forked children can parent off it directly, so a
    /// `MakeSpanGolden` call produces exactly two connected trace ids (the
    /// original and the golden twin), never a third disconnected one.
    golden_twin: Mutex<Option<Span>>,
    /// Set by [`Span::mark_golden`]: when true, [`Span::end`] copies this
    /// span's *entire* field set onto its golden twin, not just fields
    /// explicitly added via [`Span::add_golden_field`].
    copy_all_fields_to_golden: AtomicBool,
    is_golden_twin: bool,
    metrics: Mutex<Vec<Descriptor>>,
    /// If set, `end()` merges this span's fields into the target's map
    /// instead of exporting it, per the `flatten` contract.
    flatten_into: Mutex<Option<FlattenTarget>>,
    /// How many flatten levels deep this span sits: `0` for an unflattened
    /// span, `parent.depth + 1` once [`Span::flatten`] is called. Exposed to
    /// [`crate::provider::Helpers::extract_propagation`] so a flattened call
    /// chain's depth survives a trip across a process boundary.
    depth: AtomicU32,
    ended: AtomicBool,
    provider: Weak<ProviderInner>,
}

/// A live span. Cheap to clone (an `Arc` handle): clones refer to the same
/// underlying span state, so calling [`Span::end`] on any clone ends all of
/// them.
#[derive(Clone)]
pub struct Span {
    inner: Arc<Inner>,
}

impl Span {
    pub(crate) fn new_root(name: impl Into<String>, provider: Weak<ProviderInner>) -> Self {
        Self::new(name, Trace::new(), provider, false)
    }

    pub(crate) fn new_child(name: impl Into<String>, parent: &Span) -> Self {
        Self::new(
            name,
            Arc::clone(&parent.inner.trace),
            parent.inner.provider.clone(),
            false,
        )
    }

    pub(crate) fn new_with_trace(
        name: impl Into<String>,
        trace: Arc<Trace>,
        provider: Weak<ProviderInner>,
    ) -> Self {
        Self::new(name, trace, provider, false)
    }

    fn new(
        name: impl Into<String>,
        trace: Arc<Trace>,
        provider: Weak<ProviderInner>,
        is_golden_twin: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: SpanId::generate(),
                name: name.into(),
                trace,
                start: Instant::now(),
                start_unix_nanos: unix_nanos_now(),
                fields: Arc::new(Mutex::new(HashMap::new())),
                golden_twin: Mutex::new(None),
                copy_all_fields_to_golden: AtomicBool::new(false),
                is_golden_twin,
                metrics: Mutex::new(Vec::new()),
                flatten_into: Mutex::new(None),
                depth: AtomicU32::new(0),
                ended: AtomicBool::new(false),
                provider,
            }),
        }
    }

    pub fn id(&self) -> SpanId {
        self.inner.id
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.trace.id()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// How many flatten levels deep this span sits. `0` unless [`Span::flatten`]
    /// was called on it, or [`Span::seed_flatten_depth`] reconstructed a depth
    /// propagated in from another process.
    pub fn flatten_depth(&self) -> u32 {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Sets this span's reported flatten depth directly, without requiring a
    /// live local parent to merge into. Used when reconstructing a span whose
    /// flatten depth was propagated in from an upstream process via baggage:
    /// there is no in-process ancestor to flatten into, but the depth still
    /// needs to be visible to a further downstream [`Span::flatten`] call or
    /// a subsequent `ExtractPropagation`.
    pub(crate) fn seed_flatten_depth(&self, depth: u32) {
        self.inner.depth.store(depth, Ordering::SeqCst);
    }

    /// Records a field on this span under the `app.` namespace, overwriting
    /// any existing value. This is the namespace for ordinary
    /// application-declared fields; reserved control fields (`error`,
    /// `warning`, `name`) live outside it - see [`Span::add_raw_field`].
    ///
    /// A `None` (or `None`-valued `Option<T>`) `value` is silently dropped:
    /// call sites with a conditional field need no guard. An empty `key` is
    /// likewise dropped, rather than recorded as `app.`.
    pub fn add_field(&self, key: impl Into<String>, value: impl IntoField) {
        let Some(value) = value.into_field() else {
            return;
        };
        let key = key.into();
        if key.is_empty() {
            return;
        }
        self.add_raw_field_value(format!("app.{key}"), value);
    }

    /// Records a field with no `app.` prefix, eagerly rendered via `Display`.
    /// Used both for free-form unnamespaced fields and for the small set of
    /// reserved control fields the exporter layer interprets specially:
    /// `error`, `warning`, and `name` (overrides the span's exported name).
    pub fn add_raw_field(&self, key: impl Into<String>, value: impl fmt::Display) {
        self.add_raw_field_value(key.into(), FieldValue::Rendered(value.to_string()));
    }

    fn add_raw_field_value(&self, key: String, value: FieldValue) {
        self.inner
            .fields
            .lock()
            .expect("span field map mutex poisoned")
            .insert(key, value);
    }

    /// Records a field on every span in this trace, not just this one. A
    /// `None`-valued `value` is silently dropped, same as [`Span::add_field`].
    pub fn add_field_to_trace(&self, key: impl Into<String>, value: impl IntoField) {
        let Some(value) = value.into_field() else {
            return;
        };
        self.inner.trace.add_field(key, value);
    }

    /// Records a field destined for this span's golden twin rather than the
    /// span itself, mirroring a `golden-<header>` baggage entry. Creates the
    /// twin on first use if none exists yet. A `None`-valued `value` is
    /// silently dropped, same as [`Span::add_field`].
    pub fn add_golden_field(&self, key: impl Into<String>, value: impl IntoField) {
        let Some(value) = value.into_field() else {
            return;
        };
        self.golden_twin_or_create().add_raw_field_value(key.into(), value);
    }

    /// Marks this entire span golden: on [`Span::end`], its full field set
    /// (not just fields added via [`Span::add_golden_field`]) is duplicated
    /// into its golden twin, which keeps this span's own name (plus a
    /// `meta.golden=true` field) and exports unconditionally regardless of
    /// sampling.
    ///
    /// Returns the twin, which is itself the root of a second, parallel
    /// trace: callers that need to fork further children into that trace
    /// (see [`crate::provider::Provider::make_golden`]) parent them off the
    /// returned handle, so a single golden call produces exactly two
    /// connected trace ids rather than a third, disconnected one.
    pub fn mark_golden(&self) -> Span {
        let twin = self.golden_twin_or_create();
        self.inner
            .copy_all_fields_to_golden
            .store(true, Ordering::SeqCst);
        twin
    }

    /// Returns this span's golden twin, creating it on first use: a fresh
    /// root span in its own trace, keeping this span's name, with
    /// `meta.golden=true` already set. Idempotent: later calls return the
    /// same twin handle.
    fn golden_twin_or_create(&self) -> Span {
        let mut slot = self
            .inner
            .golden_twin
            .lock()
            .expect("golden twin mutex poisoned");
        if let Some(twin) = slot.as_ref() {
            return twin.clone();
        }
        let twin = Span::new(
            self.inner.name.clone(),
            Trace::new(),
            self.inner.provider.clone(),
            true,
        );
        twin.add_raw_field("meta.golden", true);
        *slot = Some(twin.clone());
        twin
    }

    /// Attaches a metric descriptor, resolved when this span ends.
    pub fn record_metric(&self, descriptor: Descriptor) {
        self.inner
            .metrics
            .lock()
            .expect("span metric list mutex poisoned")
            .push(descriptor);
    }

    /// Marks this span as flattened: on [`Span::end`], its fields are merged
    /// into `parent`'s own field map under `prefix` instead of being exported
    /// on their own. If `parent` is itself flattened, the merge target and
    /// prefix are inherited so nested flattens still land on the first
    /// non-flattened ancestor.
    pub fn flatten(&self, parent: &Span, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.inner
            .depth
            .store(parent.flatten_depth() + 1, Ordering::SeqCst);
        let parent_target = parent
            .inner
            .flatten_into
            .lock()
            .expect("flatten target mutex poisoned")
            .clone();

        let target = match parent_target {
            Some(parent_target) => FlattenTarget {
                fields: parent_target.fields,
                prefix: format!("{}.{prefix}", parent_target.prefix),
            },
            None => FlattenTarget {
                fields: Arc::clone(&parent.inner.fields),
                prefix,
            },
        };

        *self
            .inner
            .flatten_into
            .lock()
            .expect("flatten target mutex poisoned") = Some(target);
    }

    /// Ends this span, resolving metrics, merging flattened fields into the
    /// parent, and exporting the (sampled) span and its golden twin if any.
    ///
    /// Safe to call more than once, including concurrently from multiple
    /// clones of the same [`Span`]: only the first call has any effect.
    pub fn end(&self) {
        if self.inner.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        let elapsed = self.inner.start.elapsed();
        let fields = self
            .inner
            .fields
            .lock()
            .expect("span field map mutex poisoned")
            .clone();

        self.emit_metrics(&fields, elapsed);
        self.emit_synthetic_error_counters(&fields);
        self.sync_golden_twin(&fields);

        let flatten_target = self
            .inner
            .flatten_into
            .lock()
            .expect("flatten target mutex poisoned")
            .clone();

        if let Some(target) = flatten_target {
            let mut ancestor_fields = target
                .fields
                .lock()
                .expect("flatten ancestor field map mutex poisoned");
            for (key, value) in fields {
                ancestor_fields.insert(format!("{}.{key}", target.prefix), value);
            }
            // Flattened spans are never exported or sampled on their own.
            return;
        }

        let Some(provider) = self.inner.provider.upgrade() else {
            return;
        };

        let name = effective_name(&fields, &self.inner.name);
        let mut merged = provider.global_fields_snapshot();
        merged.extend(self.inner.trace.fields_snapshot());
        merged.extend(fields);

        if self.inner.is_golden_twin {
            // Golden twins bypass the sampler entirely: they exist
            // specifically to guarantee visibility into otherwise
            // sampled-away traces.
            provider.export(Exported {
                trace_id: self.trace_id(),
                span_id: self.id(),
                name,
                start_unix_nanos: self.inner.start_unix_nanos,
                duration: elapsed,
                fields: merged,
            });
            return;
        }

        let sample_input = SampleInput {
            span_id: self.id(),
            name: &name,
            duration_ms: elapsed.as_millis() as u64,
            fields: &merged,
        };
        let (keep, rate) = provider.sampler().decide(&sample_input);
        if keep {
            merged.insert("SampleRate".to_owned(), FieldValue::I64(rate as i64));
            provider.export(Exported {
                trace_id: self.trace_id(),
                span_id: self.id(),
                name,
                start_unix_nanos: self.inner.start_unix_nanos,
                duration: elapsed,
                fields: merged,
            });
        }
    }

    /// If this span has a golden twin, copies its fields onto the twin (if
    /// [`Span::mark_golden`] was called) and ends the twin too, per the
    /// "enriched with the same fields and also ended" rule. A twin never
    /// spawns its own twin.
    fn sync_golden_twin(&self, own_fields: &Fields) {
        if self.inner.is_golden_twin {
            return;
        }

        let twin = self
            .inner
            .golden_twin
            .lock()
            .expect("golden twin mutex poisoned")
            .clone();
        let Some(twin) = twin else {
            return;
        };

        if self
            .inner
            .copy_all_fields_to_golden
            .load(Ordering::SeqCst)
        {
            for (key, value) in own_fields {
                twin.add_raw_field_value(key.clone(), value.clone());
            }
        }

        twin.end();
    }

    fn emit_metrics(&self, fields: &Fields, elapsed: Duration) {
        let Some(provider) = self.inner.provider.upgrade() else {
            return;
        };
        let descriptors = self
            .inner
            .metrics
            .lock()
            .expect("span metric list mutex poisoned")
            .clone();

        for descriptor in descriptors {
            let mut tags = descriptor
                .tag_fields
                .iter()
                .filter_map(|field| {
                    resolve_field(fields, field).map(|v| (field.clone(), v.render()))
                })
                .collect::<Vec<_>>();
            if let Some((name, value)) = &descriptor.fixed_tag {
                tags.push((name.clone(), value.clone()));
            }

            let value = match descriptor.kind {
                metric::Kind::Timer => {
                    let ms = match &descriptor.value_field {
                        None => Some(elapsed.as_secs_f64() * 1000.0),
                        Some(f) => resolve_field(fields, f).and_then(FieldValue::as_f64),
                    };
                    let Some(ms) = ms else {
                        warn!(metric = %descriptor.name, "metric descriptor missing its value field");
                        continue;
                    };
                    metric::Value::Duration(Duration::from_secs_f64(ms / 1000.0))
                }
                metric::Kind::Count => {
                    let count = match &descriptor.value_field {
                        None => Some(1.0),
                        Some(f) => resolve_field(fields, f).and_then(FieldValue::as_f64),
                    };
                    let Some(count) = count else {
                        warn!(metric = %descriptor.name, "metric descriptor missing its value field");
                        continue;
                    };
                    metric::Value::F64(count)
                }
                metric::Kind::Gauge | metric::Kind::Histogram => {
                    let Some(value) = descriptor
                        .value_field
                        .as_ref()
                        .and_then(|f| resolve_field(fields, f))
                        .and_then(FieldValue::as_f64)
                    else {
                        warn!(metric = %descriptor.name, "metric descriptor missing its value field");
                        continue;
                    };
                    metric::Value::F64(value)
                }
            };

            provider.emit_metric(metric::Resolved {
                kind: descriptor.kind,
                name: descriptor.name.clone(),
                value,
                tags,
            });
        }
    }

    /// Scans this span's fields for the standard diagnostic shapes and emits
    /// synthetic counters for them, independent of any [`Descriptor`] the
    /// caller declared: a `<prefix>_error` field promotes itself to a
    /// `failure{class:<prefix>}` count (once per matching field), and the
    /// presence of `error` or `warning` emits an `error`/`warning` count
    /// tagged `type:o11y`.
    fn emit_synthetic_error_counters(&self, fields: &Fields) {
        let Some(provider) = self.inner.provider.upgrade() else {
            return;
        };

        for key in fields.keys() {
            let Some(class) = key.strip_suffix("_error") else {
                continue;
            };
            provider.emit_metric(metric::Resolved {
                kind: metric::Kind::Count,
                name: metric::FAILURE_COUNTER_NAME.to_owned(),
                value: metric::Value::F64(1.0),
                tags: vec![("class".to_owned(), class.to_owned())],
            });
        }

        let is_warning = fields.contains_key("warning");
        let is_error = fields.contains_key("error");

        if is_warning {
            provider.emit_metric(metric::Resolved {
                kind: metric::Kind::Count,
                name: metric::WARNING_COUNTER_NAME.to_owned(),
                value: metric::Value::F64(1.0),
                tags: vec![("type".to_owned(), "o11y".to_owned())],
            });
        }
        if is_error {
            provider.emit_metric(metric::Resolved {
                kind: metric::Kind::Count,
                name: metric::ERROR_COUNTER_NAME.to_owned(),
                value: metric::Value::F64(1.0),
                tags: vec![("type".to_owned(), "o11y".to_owned())],
            });
        }
    }
}

/// Looks up `field` in `fields`, falling back to the `app.`-prefixed name: a
/// metric descriptor may name either the raw field (`status`) or the
/// app-namespaced one (`latency_ms`, recorded as `app.latency_ms` via
/// [`Span::add_field`]).
fn resolve_field<'a>(fields: &'a Fields, field: &str) -> Option<&'a FieldValue> {
    fields
        .get(field)
        .or_else(|| fields.get(&format!("app.{field}")))
}

fn unix_nanos_now() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// A convenience trait to help call sites record a `Result`'s error (as an
/// `error` or `warning` field, depending on [`IsWarning::is_warning`]) in one
/// line, e.g. `span.record_result(&result)`.
pub trait RecordResult {
    fn record_result(&self, span: &Span);
}

impl<T, E: fmt::Display + IsWarning> RecordResult for Result<T, E> {
    fn record_result(&self, span: &Span) {
        if let Err(e) = self {
            if e.is_warning() {
                // `warning` is a reserved, unprefixed field (like `error` and
                // `result`): the synthetic-counter scan in `Span::end` and
                // the text exporter's exclusion list both key off the raw
                // name, not `app.warning`.
                span.add_raw_field("warning", e);
            } else {
                span.add_raw_field("error", e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::provider::Provider;

    #[test]
    fn concurrent_end_is_idempotent() {
        let provider = Provider::for_testing();
        let span = Arc::new(provider.start_span("concurrent"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let span = Arc::clone(&span);
                std::thread::spawn(move || span.end())
            })
            .collect();
        for handle in handles {
            handle.join().expect("end() should not panic");
        }

        assert_eq!(
            provider
                .exported_spans()
                .iter()
                .filter(|s| s.name == "concurrent")
                .count(),
            1
        );
    }

    #[test]
    fn flatten_merges_fields_into_parent_and_skips_export() {
        let provider = Provider::for_testing();
        let parent = provider.start_span("parent");
        let child = provider.start_child_span(&parent, "child");
        child.flatten(&parent, "child");
        child.add_field("status", "ok");
        child.end();
        parent.add_field("top", "level");
        parent.end();

        let exported = provider.exported_spans();
        assert_eq!(exported.len(), 1);
        // Flatten merges a span's fields verbatim (including the `app.`
        // namespace) under `<prefix>.`, matching spec §8 S5's nested example
        // (`opp.l2.app.lemons`).
        assert_eq!(
            exported[0].fields.get("child.app.status"),
            Some(&FieldValue::Str("ok".to_owned()))
        );
    }

    #[test]
    fn nested_flatten_composes_prefixes_onto_first_unflattened_ancestor() {
        let provider = Provider::for_testing();
        let root = provider.start_span("root");
        let op = provider.start_child_span(&root, "op");
        op.flatten(&root, "opp");
        let sub = provider.start_child_span(&op, "sub");
        sub.flatten(&op, "l2");
        sub.add_field("lemons", "five");
        sub.end();
        op.end();
        root.end();

        let exported = provider.exported_spans();
        assert_eq!(exported.len(), 1);
        assert_eq!(
            exported[0].fields.get("opp.l2.app.lemons"),
            Some(&FieldValue::Str("five".to_owned()))
        );
    }

    #[test]
    fn golden_twin_exports_even_when_sampled_out() {
        // `for_testing` alone always keeps everything; swap in a sampler that
        // rejects every span to prove the golden twin bypasses it entirely.
        // Built directly (not via `Provider::new`) so this stays a plain
        // `#[test]`: `Provider::new` spawns a background batch task and
        // requires a live Tokio runtime.
        let mut rates = std::collections::HashMap::new();
        rates.insert("risky".to_owned(), u32::MAX);
        let provider =
            Provider::for_testing_with_sampler(crate::sampler::Sampler::by_name(rates));
        let span = provider.start_span("risky");
        span.add_golden_field("risk", "high");
        span.end();

        let exported = provider.exported_spans();
        // The twin keeps the original span's name, distinguished by
        // `meta.golden=true` rather than a renamed/synthesized suffix.
        let twin = exported
            .iter()
            .find(|s| s.name == "risky" && s.fields.contains_key("meta.golden"))
            .expect("golden twin exported even though the span itself was sampled out");
        assert_eq!(
            twin.fields.get("risk"),
            Some(&FieldValue::Str("high".to_owned()))
        );
        // The sampled-out original must not itself have been exported.
        assert!(!exported
            .iter()
            .any(|s| s.name == "risky" && !s.fields.contains_key("meta.golden")));
    }

    #[test]
    fn none_valued_field_is_dropped_silently() {
        let provider = Provider::for_testing();
        let span = provider.start_span("nil-field");
        let absent: Option<i64> = None;
        span.add_field("maybe", absent);
        span.add_field("present", Some(42_i64));
        span.end();

        let exported = provider.exported_spans();
        let exported = &exported[0];
        assert!(!exported.fields.contains_key("app.maybe"));
        assert_eq!(
            exported.fields.get("app.present"),
            Some(&FieldValue::I64(42))
        );
    }

    #[test]
    fn mark_golden_duplicates_whole_field_set() {
        let provider = Provider::for_testing();
        let span = provider.start_span("whole");
        span.mark_golden();
        span.add_field("status", "ok");
        span.end();

        let exported = provider.exported_spans();
        let twin = exported
            .iter()
            .find(|s| s.name == "whole" && s.fields.contains_key("meta.golden"))
            .expect("golden twin exported");
        assert_eq!(
            twin.fields.get("app.status"),
            Some(&FieldValue::Str("ok".to_owned()))
        );
    }

    #[test]
    fn mark_golden_keeps_original_name_and_links_forked_children() {
        let provider = Provider::for_testing();
        let span = provider.start_span("checkout");
        let golden_root = span.mark_golden();
        assert_eq!(golden_root.name(), "checkout");

        let forked_child = provider.start_child_span(&golden_root, "charge-card");
        forked_child.end();
        span.end();

        let exported = provider.exported_spans();
        let twin = exported
            .iter()
            .find(|s| s.name == "checkout" && s.fields.contains_key("meta.golden"))
            .expect("golden twin exported");
        let child = exported
            .iter()
            .find(|s| s.name == "charge-card")
            .expect("forked child exported");
        // Exactly two connected trace ids: the original span's trace, and
        // the golden twin's trace shared by everything forked off it.
        assert_ne!(twin.trace_id, span.trace_id());
        assert_eq!(child.trace_id, twin.trace_id);
    }
}
