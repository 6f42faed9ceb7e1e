//! A statsd-style UDP metrics emitter.
//!
//! Metrics are a side-channel from tracing: emission is fire-and-forget over
//! UDP, matching the statsd wire convention (`name:value|type|#tag:val,...`)
//! so this can feed any statsd-compatible collector without this crate
//! needing to implement a pluggable backend abstraction (out of scope; see
//! [`crate`] docs).

use std::{net::SocketAddr, sync::Arc};

use tokio::net::UdpSocket;
use tracing::warn;

use crate::metric::{Kind, Resolved, Value};

/// Emits resolved metrics as statsd-formatted UDP datagrams.
#[derive(Clone)]
pub struct Emitter {
    socket: Arc<UdpSocket>,
    /// Prepended as `<namespace>.<name>` to every emitted metric. Empty
    /// means no namespace component.
    namespace: Arc<str>,
}

impl Emitter {
    /// Binds an ephemeral local UDP socket and connects it to `addr`, so
    /// subsequent sends don't need to re-specify the destination.
    ///
    /// Synchronous (uses `std::net::UdpSocket` under the hood) so it can be
    /// called from [`Provider::new`](crate::provider::Provider::new), which
    /// is itself synchronous; the socket is still registered with the
    /// current Tokio reactor, so this must be called from within a runtime.
    pub fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        Self::connect_with_namespace(addr, "")
    }

    /// Same as [`Emitter::connect`], but prefixes every metric name with
    /// `namespace.`.
    pub fn connect_with_namespace(
        addr: SocketAddr,
        namespace: impl Into<String>,
    ) -> std::io::Result<Self> {
        let std_socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        std_socket.connect(addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(Self {
            socket: Arc::new(socket),
            namespace: Arc::from(namespace.into()),
        })
    }

    /// Emits a single metric. Errors are logged, not propagated: a dropped
    /// metric datagram should never fail the request it was measuring.
    pub fn emit(&self, metric: Resolved) {
        let line = encode(&metric, &self.namespace);
        let socket = Arc::clone(&self.socket);
        // `send` on a connected UDP socket never blocks for long, but we
        // still spawn so a transient DNS/route hiccup can't stall span end.
        tokio::spawn(async move {
            if let Err(e) = socket.send(line.as_bytes()).await {
                warn!("failed to send metric datagram: {e:#}");
            }
        });
    }
}

fn encode(metric: &Resolved, namespace: &str) -> String {
    // Wire types are limited to `c`/`g`/`ms` (timer and histogram both ride
    // the `ms` type, per the statsd convention this toolkit targets).
    let (value, type_suffix) = match (&metric.value, metric.kind) {
        (Value::Duration(d), _) => (d.as_secs_f64() * 1000.0, "ms"),
        (Value::F64(v), Kind::Count) => (*v, "c"),
        (Value::F64(v), Kind::Gauge) => (*v, "g"),
        (Value::F64(v), Kind::Histogram | Kind::Timer) => (*v, "ms"),
    };

    let name = if namespace.is_empty() {
        metric.name.clone()
    } else {
        format!("{namespace}.{}", metric.name)
    };

    let mut line = format!("{name}:{value}|{type_suffix}");
    if !metric.tags.is_empty() {
        let tags = metric
            .tags
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str(&format!("|#{tags}"));
    }
    line
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn encodes_timer_in_milliseconds() {
        let metric = Resolved {
            kind: Kind::Timer,
            name: "httpclient".to_owned(),
            value: Value::Duration(Duration::from_millis(250)),
            tags: vec![("route".to_owned(), "/v1/ping".to_owned())],
        };
        assert_eq!(
            encode(&metric, ""),
            "httpclient:250|ms|#route:/v1/ping"
        );
    }

    #[test]
    fn encodes_count_without_tags() {
        let metric = Resolved {
            kind: Kind::Count,
            name: "error".to_owned(),
            value: Value::F64(1.0),
            tags: vec![],
        };
        assert_eq!(encode(&metric, ""), "error:1|c");
    }

    #[test]
    fn encodes_histogram_as_ms_type() {
        let metric = Resolved {
            kind: Kind::Histogram,
            name: "payload_size".to_owned(),
            value: Value::F64(1024.0),
            tags: vec![],
        };
        assert_eq!(encode(&metric, ""), "payload_size:1024|ms");
    }

    #[test]
    fn prefixes_name_with_namespace() {
        let metric = Resolved {
            kind: Kind::Count,
            name: "error".to_owned(),
            value: Value::F64(1.0),
            tags: vec![],
        };
        assert_eq!(encode(&metric, "myapp"), "myapp.error:1|c");
    }
}
