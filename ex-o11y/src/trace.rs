//! [`Trace`]: the mutable field map shared by every [`Span`](crate::Span) in
//! a single trace, plus the [`TraceId`]/[`SpanId`] identifiers.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use rand::RngCore;

use crate::span::FieldValue;

/// A 16-byte trace identifier, rendered as 32 lowercase hex characters.
/// Matches the width used by OTLP/W3C trace-context, so traces generated here
/// interoperate with the wider tracing ecosystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

/// An 8-byte span identifier, rendered as 16 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl TraceId {
    pub fn generate() -> Self {
        let mut buf = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut buf);
        Self(buf)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parses a 32-character lowercase hex string, as found in a W3C
    /// `traceparent` header.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let mut buf = [0u8; 16];
        hex_decode(s, &mut buf)?;
        Some(Self(buf))
    }
}

impl SpanId {
    pub fn generate() -> Self {
        let mut buf = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut buf);
        Self(buf)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 {
            return None;
        }
        let mut buf = [0u8; 8];
        hex_decode(s, &mut buf)?;
        Some(Self(buf))
    }
}

fn hex_decode(s: &str, out: &mut [u8]) -> Option<()> {
    let bytes = s.as_bytes();
    for (i, chunk) in out.iter_mut().enumerate() {
        let hi = (bytes[i * 2] as char).to_digit(16)?;
        let lo = (bytes[i * 2 + 1] as char).to_digit(16)?;
        *chunk = (hi as u8) << 4 | (lo as u8);
    }
    Some(())
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

/// The shared, mutex-guarded field map for all spans in a single trace.
///
/// Fields added here (via
/// [`Span::add_field_to_trace`](crate::Span::add_field_to_trace), or promoted
/// from non-reserved [`Baggage`](crate::Baggage) entries on extraction) are
/// merged into every span exported under this trace, not just the span that
/// added them.
pub struct Trace {
    id: TraceId,
    fields: Mutex<HashMap<String, FieldValue>>,
}

impl Trace {
    pub fn new() -> Arc<Self> {
        Self::with_id(TraceId::generate())
    }

    pub fn with_id(id: TraceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            fields: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn add_field(&self, key: impl Into<String>, value: FieldValue) {
        self.fields
            .lock()
            .expect("trace field map mutex poisoned")
            .insert(key.into(), value);
    }

    pub fn fields_snapshot(&self) -> HashMap<String, FieldValue> {
        self.fields
            .lock()
            .expect("trace field map mutex poisoned")
            .clone()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn trace_id_hex_round_trips(bytes: [u8; 16]) {
            let id = TraceId::from_bytes(bytes);
            let hex = id.to_string();
            let parsed = TraceId::from_hex(&hex).expect("valid hex");
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn span_id_hex_round_trips(bytes: [u8; 8]) {
            let id = SpanId::from_bytes(bytes);
            let hex = id.to_string();
            let parsed = SpanId::from_hex(&hex).expect("valid hex");
            prop_assert_eq!(id, parsed);
        }
    }
}
