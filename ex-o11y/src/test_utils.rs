//! Test-only helpers shared across this crate's own tests and downstream
//! crates (e.g. `ex-o11y-http`) that want to assert on exported spans or
//! emitted metrics without standing up a real OTLP collector or statsd
//! daemon. Gated behind `test-utils` so none of this ships in a release
//! build.

use std::{
    net::{SocketAddr, UdpSocket},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::span::Exported;

/// An [`Exporter`](crate::export::Exporter) that records every batch handed
/// to it in-memory, for assertions. Distinct from
/// [`Pipeline::Testing`](crate::export::Pipeline): that variant bypasses the
/// `Exporter` trait entirely (spans never leave the pipeline), whereas this
/// one exercises the real fan-out path, useful when a test wants to verify
/// the pipeline actually calls its configured exporters.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<Exported>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> Vec<Exported> {
        self.spans.lock().expect("in-memory exporter mutex poisoned").clone()
    }
}

#[async_trait::async_trait]
impl crate::export::Exporter for InMemoryExporter {
    async fn export(&self, spans: &[Exported]) -> anyhow::Result<()> {
        self.spans
            .lock()
            .expect("in-memory exporter mutex poisoned")
            .extend_from_slice(spans);
        Ok(())
    }
}

/// A fake statsd collector: binds a local UDP socket and lets a test read
/// back the datagrams a [`crate::metrics_emitter::Emitter`] sends it,
/// without needing a real statsd daemon listening.
pub struct FakeStatsdSink {
    socket: UdpSocket,
}

impl FakeStatsdSink {
    /// Binds an ephemeral local UDP socket. The returned sink's [`addr`]
    /// is the value to pass as `Config::metrics_addr`.
    pub fn bind() -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(Self { socket })
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket
            .local_addr()
            .expect("bound socket always has a local address")
    }

    /// Blocks (up to the configured read timeout) for the next datagram and
    /// decodes it as UTF-8. Returns `None` on timeout.
    pub fn recv_line(&self) -> Option<String> {
        let mut buf = [0u8; 1024];
        let (len, _) = self.socket.recv_from(&mut buf).ok()?;
        Some(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// Like [`Self::recv_line`], but with a caller-chosen timeout instead of
    /// the 5s default — useful for asserting that *nothing* arrives without
    /// slowing every such test down to the default timeout.
    pub fn recv_line_timeout(&self, timeout: Duration) -> Option<String> {
        self.socket.set_read_timeout(Some(timeout)).ok()?;
        let result = self.recv_line();
        let _ = self.socket.set_read_timeout(Some(Duration::from_secs(5)));
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{export::Exporter, trace::SpanId, trace::TraceId};

    #[tokio::test]
    async fn in_memory_exporter_records_batches() {
        let exporter = InMemoryExporter::new();
        let span = Exported {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            name: "probe".to_owned(),
            start_unix_nanos: 0,
            duration: Duration::from_millis(1),
            fields: Default::default(),
        };
        exporter.export(std::slice::from_ref(&span)).await.unwrap();
        assert_eq!(exporter.exported().len(), 1);
    }

    #[test]
    fn fake_statsd_sink_receives_datagrams() {
        let sink = FakeStatsdSink::bind().expect("bind local socket");
        let client = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
        client.send_to(b"error:1|c", sink.addr()).expect("send datagram");
        assert_eq!(sink.recv_line(), Some("error:1|c".to_owned()));
    }
}
