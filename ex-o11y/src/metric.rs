//! Metric descriptors: declarative hints, attached to a span's fields, that
//! tell the provider how to turn that span into a metric once it ends.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The kind of metric a [`Descriptor`] resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    /// Records a duration, typically the span's own elapsed time.
    Timer,
    /// Increments a counter by a fixed or field-derived amount.
    Count,
    /// Records an instantaneous value.
    Gauge,
    /// Records a value into a distribution.
    Histogram,
}

/// Describes how to derive a metric from a span's recorded fields at the
/// point the span ends. Attached to a span via
/// [`Span::record_metric`](crate::span::Span::record_metric).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Descriptor {
    pub kind: Kind,
    /// Metric name as emitted to the metrics backend.
    pub name: String,
    /// Name of the span field holding the value to emit. `None` means "use
    /// the span's own elapsed duration" (only meaningful for [`Kind::Timer`]).
    pub value_field: Option<String>,
    /// A constant `name:value` tag attached to every emission of this
    /// metric, independent of any span field. Only meaningful for
    /// [`Kind::Count`].
    pub fixed_tag: Option<(String, String)>,
    /// Names of span fields promoted to metric tags/labels.
    pub tag_fields: Vec<String>,
}

impl Descriptor {
    pub fn timer(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Timer,
            name: name.into(),
            value_field: None,
            fixed_tag: None,
            tag_fields: Vec::new(),
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Count,
            name: name.into(),
            value_field: None,
            fixed_tag: None,
            tag_fields: Vec::new(),
        }
    }

    pub fn gauge(name: impl Into<String>, value_field: impl Into<String>) -> Self {
        Self {
            kind: Kind::Gauge,
            name: name.into(),
            value_field: Some(value_field.into()),
            fixed_tag: None,
            tag_fields: Vec::new(),
        }
    }

    pub fn histogram(name: impl Into<String>, value_field: impl Into<String>) -> Self {
        Self {
            kind: Kind::Histogram,
            name: name.into(),
            value_field: Some(value_field.into()),
            fixed_tag: None,
            tag_fields: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tag_fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag_fields = tag_fields.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a constant tag, emitted alongside every resolved tag field.
    /// Only meaningful for [`Kind::Count`] descriptors.
    pub fn with_fixed_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed_tag = Some((name.into(), value.into()));
        self
    }
}

/// A fully resolved metric, ready to hand to a [`metrics_emitter`](crate::metrics_emitter).
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub kind: Kind,
    pub name: String,
    pub value: Value,
    pub tags: Vec<(String, String)>,
}

/// The numeric payload of a [`Resolved`] metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Duration(Duration),
    F64(f64),
}

/// Synthetic counters the provider emits automatically whenever
/// [`Span::end`](crate::span::Span::end) observes an error or warning field,
/// independent of any user-declared [`Descriptor`].
pub const ERROR_COUNTER_NAME: &str = "error";
pub const WARNING_COUNTER_NAME: &str = "warning";
/// Emitted once per `<class>_error` field a span carries at end, tagged
/// `class:<class>`.
pub const FAILURE_COUNTER_NAME: &str = "failure";
