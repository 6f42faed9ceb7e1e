//! Ordered key/value metadata that travels with a trace across process
//! boundaries.
//!
//! Most baggage entries are promoted to trace-wide fields on the receiving
//! side. Two key shapes are reserved and handled specially instead:
//!
//! - `flatten`: a decimal integer giving the flatten depth the call chain
//!   was at when it left the sending process, so the receiving process's
//!   reconstructed root span reports the same depth.
//! - `golden-<header>`: baggage destined for a span's golden twin rather than
//!   the span itself; `<header>` is the field name to record.

use std::fmt;

/// Reserved baggage key carrying the sending span's flatten depth, as a
/// decimal integer.
pub const FLATTEN_KEY: &str = "flatten";

/// Prefix identifying a baggage entry destined for a span's golden twin.
pub const GOLDEN_PREFIX: &str = "golden-";

/// Maximum number of golden-prefixed baggage entries honored per trace.
/// Additional entries are dropped and logged as a warning, to bound the
/// amount of work a malicious or buggy caller can push onto the golden twin.
pub const MAX_GOLDEN_BAGGAGE_ENTRIES: usize = 8;

/// A single baggage key/value pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

/// Ordered baggage, as extracted from or injected into a `baggage` header.
///
/// Order is preserved (unlike a map) because the W3C Baggage spec treats
/// baggage as an ordered list, and callers may rely on insertion order when
/// multiple entries share a key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Baggage {
    entries: Vec<Entry>,
}

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Entry {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entries whose key starts with [`GOLDEN_PREFIX`], truncated to
    /// [`MAX_GOLDEN_BAGGAGE_ENTRIES`]. Returns the number of entries dropped
    /// by the cap so the caller can log it.
    pub fn golden_entries(&self) -> (Vec<(&str, &str)>, usize) {
        let mut golden: Vec<(&str, &str)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry
                    .key
                    .strip_prefix(GOLDEN_PREFIX)
                    .map(|header| (header, entry.value.as_str()))
            })
            .collect();

        let dropped = golden.len().saturating_sub(MAX_GOLDEN_BAGGAGE_ENTRIES);
        golden.truncate(MAX_GOLDEN_BAGGAGE_ENTRIES);
        (golden, dropped)
    }

    /// The flatten depth carried by the [`FLATTEN_KEY`] entry, if present and
    /// parseable. A malformed (non-decimal) value is treated as absent rather
    /// than failing the whole baggage parse.
    pub fn flatten_depth(&self) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.key == FLATTEN_KEY)
            .and_then(|entry| entry.value.parse().ok())
    }

    /// Entries that are neither the reserved [`FLATTEN_KEY`] nor golden-
    /// prefixed; these are promoted directly to trace-wide fields.
    pub fn plain_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|entry| entry.key != FLATTEN_KEY && !entry.key.starts_with(GOLDEN_PREFIX))
    }

    /// Serializes this baggage as a `key1=value1,key2=value2` header value,
    /// percent-encoding values so they round-trip through `,` and `=`.
    pub fn to_header_value(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}={}", entry.key, encode(&entry.value)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a `baggage` header value. Malformed entries (missing `=`) are
    /// skipped rather than failing the whole parse.
    pub fn from_header_value(value: &str) -> Self {
        let entries = value
            .split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                Some(Entry {
                    key: key.trim().to_owned(),
                    value: decode(value.trim()),
                })
            })
            .collect();
        Self { entries }
    }
}

impl fmt::Display for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header_value())
    }
}

/// Minimal percent-encoding for `,`, `=`, and `%`, the only bytes that would
/// otherwise be ambiguous in our `key=value,key=value` header encoding.
fn encode(value: &str) -> String {
    let mut out = Vec::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b',' | b'=' | b'%' => out.extend(format!("%{byte:02X}").into_bytes()),
            _ => out.push(byte),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = u8::from_str_radix(
                std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                16,
            ) {
                out.push(hex);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_header_value() {
        let mut baggage = Baggage::new();
        baggage.push("user_id", "abc123");
        baggage.push("golden-interesting", "true,yes");

        let header = baggage.to_header_value();
        let parsed = Baggage::from_header_value(&header);
        assert_eq!(baggage, parsed);
    }

    #[test]
    fn separates_flatten_golden_and_plain_entries() {
        let mut baggage = Baggage::new();
        baggage.push("flatten", "2");
        baggage.push("golden-risk", "high");
        baggage.push("region", "us-east-1");

        assert_eq!(baggage.flatten_depth(), Some(2));
        let (golden, dropped) = baggage.golden_entries();
        assert_eq!(golden, vec![("risk", "high")]);
        assert_eq!(dropped, 0);

        let plain: Vec<&str> = baggage.plain_entries().map(|e| e.key.as_str()).collect();
        assert_eq!(plain, vec!["region"]);
    }

    #[test]
    fn caps_golden_entries_at_max() {
        let mut baggage = Baggage::new();
        for i in 0..(MAX_GOLDEN_BAGGAGE_ENTRIES + 3) {
            baggage.push(format!("golden-field{i}"), i.to_string());
        }
        let (golden, dropped) = baggage.golden_entries();
        assert_eq!(golden.len(), MAX_GOLDEN_BAGGAGE_ENTRIES);
        assert_eq!(dropped, 3);
    }
}
