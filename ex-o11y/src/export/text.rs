//! A human-readable, line-per-span exporter intended for local development
//! and debugging, analogous to the stdout logger `ex-logger` configures for
//! ambient `tracing` events.

use chrono::DateTime;

use super::Exporter;
use crate::span::Exported;

/// Writes one line per span to the given sink, in the form:
///
/// ```text
/// HH:MM:SS <trace-suffix> <duration>ms <name> [key=value key=value ...]
/// ```
///
/// `<trace-suffix>` is the last five characters of the trace id, a short
/// visual anchor for following one trace across several lines without
/// printing the whole id. Field order within the trailing `[...]` list is
/// unspecified (fields are stored in a `HashMap`); this exporter is meant
/// for humans reading logs locally, not for machine parsing.
pub struct TextExporter<W> {
    sink: std::sync::Mutex<W>,
    colour: bool,
}

impl<W> TextExporter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: std::sync::Mutex::new(sink),
            colour: false,
        }
    }

    /// Colourise the `error` key's value in the trailing field list, the way
    /// a terminal-facing logger would. No effect on any other key.
    pub fn with_colour(mut self, colour: bool) -> Self {
        self.colour = colour;
        self
    }
}

impl TextExporter<std::io::Stdout> {
    /// Stdout sink, colourised iff stdout is a tty.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout()).with_colour(std::io::IsTerminal::is_terminal(&std::io::stdout()))
    }
}

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Keys never printed in the trailing `[key=value ...]` list: namespaced
/// metadata this exporter doesn't surface there (`trace.*`, `meta.*`), plus
/// the handful of reserved fields already folded into the fixed prefix.
fn is_excluded(key: &str) -> bool {
    matches!(key, "name" | "version" | "service" | "duration_ms")
        || key.starts_with("trace.")
        || key.starts_with("meta.")
}

/// The last five characters of a trace id's hex rendering, or the whole id
/// if it's shorter than that (never the case for a real [`TraceId`], but
/// keeps this from panicking on a pathologically short one).
///
/// [`TraceId`]: crate::trace::TraceId
fn trace_suffix(trace_id: &str) -> &str {
    let len = trace_id.len();
    &trace_id[len.saturating_sub(5)..]
}

#[async_trait::async_trait]
impl<W: std::io::Write + Send + 'static> Exporter for TextExporter<W> {
    async fn export(&self, spans: &[Exported]) -> anyhow::Result<()> {
        use std::io::Write;

        let mut sink = self.sink.lock().expect("text exporter sink mutex poisoned");
        for span in spans {
            let secs = (span.start_unix_nanos / 1_000_000_000) as i64;
            let nanos = (span.start_unix_nanos % 1_000_000_000) as u32;
            let clock = DateTime::from_timestamp(secs, nanos)
                .unwrap_or_default()
                .format("%H:%M:%S");
            let trace_id = span.trace_id.to_string();
            write!(
                sink,
                "{clock} {} {:.3}ms {}",
                trace_suffix(&trace_id),
                span.duration.as_secs_f64() * 1000.0,
                span.name,
            )?;

            let mut fields: Vec<_> = span
                .fields
                .iter()
                .filter(|(key, _)| !is_excluded(key))
                .collect();
            if !fields.is_empty() {
                fields.sort_by(|a, b| a.0.cmp(b.0));
                write!(sink, " [")?;
                for (i, (key, value)) in fields.into_iter().enumerate() {
                    if i > 0 {
                        write!(sink, " ")?;
                    }
                    if self.colour && key == "error" {
                        write!(sink, "{key}={RED}{}{RESET}", value.render())?;
                    } else {
                        write!(sink, "{key}={}", value.render())?;
                    }
                }
                write!(sink, "]")?;
            }
            writeln!(sink)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::trace::{SpanId, TraceId};

    #[tokio::test]
    async fn writes_one_line_per_span() {
        let buf: Vec<u8> = Vec::new();
        let exporter = TextExporter::new(buf);

        let span = Exported {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            name: "test".to_owned(),
            start_unix_nanos: 0,
            duration: Duration::from_millis(5),
            fields: Default::default(),
        };
        exporter.export(std::slice::from_ref(&span)).await.unwrap();

        let sink = exporter.sink.lock().unwrap();
        let text = String::from_utf8_lossy(&sink);
        // HH:MM:SS, trace suffix, duration, name, in that order, no trailing
        // field list since this span has none.
        assert!(text.starts_with("00:00:00 "));
        assert!(text.contains("5.000ms test"));
        assert!(!text.contains('['));
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn omits_excluded_keys_from_the_trailing_field_list() {
        let buf: Vec<u8> = Vec::new();
        let exporter = TextExporter::new(buf);

        let mut fields = crate::span::Fields::new();
        fields.insert("service".to_owned(), "checkout".into());
        fields.insert("trace.sampled".to_owned(), true.into());
        fields.insert("meta.golden".to_owned(), true.into());
        fields.insert("app.status".to_owned(), "ok".into());

        let span = Exported {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            name: "test".to_owned(),
            start_unix_nanos: 0,
            duration: Duration::from_millis(5),
            fields,
        };
        exporter.export(std::slice::from_ref(&span)).await.unwrap();

        let sink = exporter.sink.lock().unwrap();
        let text = String::from_utf8_lossy(&sink);
        assert!(text.contains("app.status=ok"));
        assert!(!text.contains("service="));
        assert!(!text.contains("trace.sampled"));
        assert!(!text.contains("meta.golden"));
    }

    #[tokio::test]
    async fn colourises_only_the_error_key_when_colour_is_on() {
        let buf: Vec<u8> = Vec::new();
        let exporter = TextExporter::new(buf).with_colour(true);

        let mut fields = crate::span::Fields::new();
        fields.insert("error".to_owned(), "boom".into());
        fields.insert("app.status".to_owned(), "failed".into());

        let span = Exported {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            name: "test".to_owned(),
            start_unix_nanos: 0,
            duration: Duration::from_millis(5),
            fields,
        };
        exporter.export(std::slice::from_ref(&span)).await.unwrap();

        let sink = exporter.sink.lock().unwrap();
        let text = String::from_utf8_lossy(&sink);
        assert!(text.contains("error=\x1b[31mboom\x1b[0m"));
        assert!(text.contains("app.status=failed"));
        assert!(!text.contains("status=\x1b[31m"));
    }

    #[tokio::test]
    async fn no_ansi_codes_when_colour_is_off() {
        let buf: Vec<u8> = Vec::new();
        let exporter = TextExporter::new(buf);

        let mut fields = crate::span::Fields::new();
        fields.insert("error".to_owned(), "boom".into());

        let span = Exported {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            name: "test".to_owned(),
            start_unix_nanos: 0,
            duration: Duration::from_millis(5),
            fields,
        };
        exporter.export(std::slice::from_ref(&span)).await.unwrap();

        let sink = exporter.sink.lock().unwrap();
        let text = String::from_utf8_lossy(&sink);
        assert!(text.contains("error=boom"));
        assert!(!text.contains("\x1b["));
    }

    #[test]
    fn trace_suffix_takes_the_last_five_characters() {
        assert_eq!(trace_suffix("0123456789abcdef"), "bcdef");
        assert_eq!(trace_suffix("ab"), "ab");
    }
}
