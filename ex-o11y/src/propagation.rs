//! Cross-process propagation of trace context and baggage over HTTP headers,
//! following the shape of the W3C Trace Context and Baggage specs.

use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::{
    baggage::Baggage,
    trace::{SpanId, TraceId},
};

pub static TRACEPARENT_HEADER: HeaderName = HeaderName::from_static("traceparent");
pub static TRACESTATE_HEADER: HeaderName = HeaderName::from_static("tracestate");
pub static BAGGAGE_HEADER: HeaderName = HeaderName::from_static("baggage");

/// Trace context and baggage extracted from, or destined for, HTTP headers.
#[derive(Clone, Debug, Default)]
pub struct PropagationCarrier {
    /// The remote trace id and parent span id, if a valid `traceparent`
    /// header was present.
    pub parent: Option<(TraceId, SpanId)>,
    /// The raw `tracestate` header value, if present. Opaque to this
    /// toolkit: carried through unmodified rather than parsed, since nothing
    /// here reads or writes individual vendor entries.
    pub tracestate: Option<String>,
    pub baggage: Baggage,
}

impl PropagationCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts trace context and baggage from a set of incoming request
    /// headers. Malformed headers are logged as warnings and otherwise
    /// ignored rather than failing the request.
    pub fn extract(headers: &HeaderMap) -> Self {
        let parent = headers
            .get(&TRACEPARENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| match parse_traceparent(value) {
                Some(parent) => Some(parent),
                None => {
                    warn!(traceparent = value, "ignoring malformed traceparent header");
                    None
                }
            });

        let tracestate = headers
            .get(&TRACESTATE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let baggage = headers
            .get(&BAGGAGE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(Baggage::from_header_value)
            .unwrap_or_default();

        Self {
            parent,
            tracestate,
            baggage,
        }
    }

    /// Injects this carrier's trace id and span id (as the new parent) and
    /// baggage into a set of outgoing request headers.
    pub fn inject(&self, trace_id: TraceId, span_id: SpanId, headers: &mut HeaderMap) {
        let traceparent = format!("00-{trace_id}-{span_id}-01");
        if let Ok(value) = HeaderValue::from_str(&traceparent) {
            headers.insert(TRACEPARENT_HEADER.clone(), value);
        }
        self.write_tracestate(headers);
        self.write_baggage(headers);
    }

    /// Writes this carrier's own `parent` (if any), `tracestate`, and baggage
    /// into `headers`, without requiring the caller to separately supply a
    /// trace/span id. Used by
    /// [`crate::provider::Helpers::extract_propagation`], where the ids (if
    /// any) already live in `self.parent`.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        if let Some((trace_id, span_id)) = self.parent {
            let traceparent = format!("00-{trace_id}-{span_id}-01");
            if let Ok(value) = HeaderValue::from_str(&traceparent) {
                headers.insert(TRACEPARENT_HEADER.clone(), value);
            }
        }
        self.write_tracestate(headers);
        self.write_baggage(headers);
    }

    fn write_tracestate(&self, headers: &mut HeaderMap) {
        if let Some(tracestate) = &self.tracestate {
            if let Ok(value) = HeaderValue::from_str(tracestate) {
                headers.insert(TRACESTATE_HEADER.clone(), value);
            }
        }
    }

    fn write_baggage(&self, headers: &mut HeaderMap) {
        if !self.baggage.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.baggage.to_header_value()) {
                headers.insert(BAGGAGE_HEADER.clone(), value);
            }
        }
    }
}

/// Parses a W3C `traceparent` header: `{version}-{trace-id}-{parent-id}-{flags}`.
pub(crate) fn parse_traceparent(value: &str) -> Option<(TraceId, SpanId)> {
    let mut parts = value.split('-');
    let _version = parts.next()?;
    let trace_id = TraceId::from_hex(parts.next()?)?;
    let span_id = SpanId::from_hex(parts.next()?)?;
    let _flags = parts.next()?;
    Some((trace_id, span_id))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_valid_traceparent_and_baggage() {
        let trace_id = TraceId::generate();
        let span_id = SpanId::generate();

        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT_HEADER.clone(),
            HeaderValue::from_str(&format!("00-{trace_id}-{span_id}-01")).unwrap(),
        );
        headers.insert(
            BAGGAGE_HEADER.clone(),
            HeaderValue::from_static("user_id=abc123"),
        );

        let carrier = PropagationCarrier::extract(&headers);
        assert_eq!(carrier.parent, Some((trace_id, span_id)));
        assert_eq!(carrier.baggage.iter().count(), 1);
    }

    #[test]
    fn ignores_malformed_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER.clone(), HeaderValue::from_static("garbage"));
        let carrier = PropagationCarrier::extract(&headers);
        assert!(carrier.parent.is_none());
    }

    #[test]
    fn inject_then_extract_round_trips_trace_context() {
        let trace_id = TraceId::generate();
        let span_id = SpanId::generate();
        let carrier = PropagationCarrier::new();

        let mut headers = HeaderMap::new();
        carrier.inject(trace_id, span_id, &mut headers);

        let extracted = PropagationCarrier::extract(&headers);
        assert_eq!(extracted.parent, Some((trace_id, span_id)));
    }
}
