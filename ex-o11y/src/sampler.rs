//! Deterministic tail sampling.
//!
//! A [`Sampler`] decides, once a span ends, whether its trace is worth
//! keeping. The key function picks a `SampleRates` entry (a named rate); the
//! keep/drop coin flip itself is always a CRC32 hash of the span id, so every
//! span sharing an id always resolves the same way regardless of which key
//! it was looked up under.

use std::{collections::HashMap, sync::Arc};

use crate::{span::Fields, trace::SpanId};

/// The inputs a [`KeyFn`] can use to pick a `SampleRates` key: the span's
/// field snapshot plus its name and computed duration, per §4.6's
/// `fields ∪ {name, duration_ms}`.
pub struct SampleInput<'a> {
    pub span_id: SpanId,
    pub name: &'a str,
    pub duration_ms: u64,
    pub fields: &'a Fields,
}

/// Picks the `SampleRates` key for a completed span. Implementations must be
/// deterministic: the same span snapshot should always produce the same key.
pub type KeyFn = Arc<dyn Fn(&SampleInput<'_>) -> String + Send + Sync>;

/// A tail sampler: looks up a per-key rate in `SampleRates` and keeps
/// roughly 1-in-`rate` spans for that key, chosen deterministically by
/// hashing the span id. A key with no configured rate defaults to
/// `keep=true, rate=1`.
#[derive(Clone)]
pub struct Sampler {
    key_fn: KeyFn,
    rates: Arc<HashMap<String, u32>>,
}

impl Sampler {
    /// Builds a sampler with a custom [`KeyFn`] and per-key rate table.
    pub fn new(key_fn: KeyFn, rates: HashMap<String, u32>) -> Self {
        Self {
            key_fn,
            rates: Arc::new(rates),
        }
    }

    /// A sampler that keys on the span's name: every span sharing a name
    /// looks up the same configured rate.
    pub fn by_name(rates: HashMap<String, u32>) -> Self {
        Self::new(Arc::new(|input: &SampleInput<'_>| input.name.to_owned()), rates)
    }

    /// A sampler with an empty rate table: every key misses the lookup, so
    /// every span is kept at `rate=1`.
    pub fn always_on() -> Self {
        Self::new(Arc::new(|_: &SampleInput<'_>| String::new()), HashMap::new())
    }

    /// Returns `(keep, rate)` for the given completed-span snapshot, per
    /// §4.6: missing key keeps everything at `rate=1`; otherwise the span id
    /// is hashed and compared against a threshold derived from the looked-up
    /// rate.
    pub fn decide(&self, input: &SampleInput<'_>) -> (bool, u32) {
        let key = (self.key_fn)(input);
        let rate = self.rates.get(&key).copied().unwrap_or(1);

        if rate < 2 {
            return (true, rate.max(1));
        }

        // `rate` is already a `u32`, so it can never exceed the spec's
        // `2^32-1` clamp.
        let threshold = (u64::from(u32::MAX) + 1) / u64::from(rate);
        let threshold = u32::try_from(threshold.min(u64::from(u32::MAX))).unwrap_or(u32::MAX);
        let keep = crc32fast::hash(&input.span_id.as_bytes()[..]) < threshold;
        (keep, rate)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn missing_key_always_keeps_at_rate_one() {
        let sampler = Sampler::always_on();
        let fields = Fields::new();
        let input = SampleInput {
            span_id: SpanId::generate(),
            name: "root",
            duration_ms: 0,
            fields: &fields,
        };
        assert_eq!(sampler.decide(&input), (true, 1));
    }

    #[test]
    fn rate_below_two_always_keeps() {
        let mut rates = HashMap::new();
        rates.insert("root".to_owned(), 1);
        let sampler = Sampler::by_name(rates);
        let fields = Fields::new();
        let input = SampleInput {
            span_id: SpanId::generate(),
            name: "root",
            duration_ms: 0,
            fields: &fields,
        };
        assert_eq!(sampler.decide(&input), (true, 1));
    }

    #[test]
    fn different_keys_get_different_rates() {
        let mut rates = HashMap::new();
        rates.insert("hot".to_owned(), 1);
        rates.insert("cold".to_owned(), 1000);
        let sampler = Sampler::by_name(rates);
        let fields = Fields::new();

        let hot = SampleInput {
            span_id: SpanId::generate(),
            name: "hot",
            duration_ms: 0,
            fields: &fields,
        };
        assert_eq!(sampler.decide(&hot).1, 1);

        let cold = SampleInput {
            span_id: SpanId::generate(),
            name: "cold",
            duration_ms: 0,
            fields: &fields,
        };
        assert_eq!(sampler.decide(&cold).1, 1000);
    }

    proptest! {
        #[test]
        fn sample_rate_converges(seed: u64) {
            let _ = seed;
            let rate = 10u32;
            let mut rates = HashMap::new();
            rates.insert("span".to_owned(), rate);
            let sampler = Sampler::by_name(rates);
            let fields = Fields::new();

            let mut kept = 0u32;
            let total = 5_000u32;
            for _ in 0..total {
                let input = SampleInput {
                    span_id: SpanId::generate(),
                    name: "span",
                    duration_ms: 0,
                    fields: &fields,
                };
                if sampler.decide(&input).0 {
                    kept += 1;
                }
            }

            // Should land within a generous band of the expected 1/rate proportion.
            let expected = total / rate;
            let lower = expected / 2;
            let upper = expected * 2;
            prop_assert!(kept >= lower && kept <= upper, "kept={kept} expected~{expected}");
        }
    }
}
