//! Per-client configuration, mirroring the source system's `ClientConfig`
//! option set (§4.8 of the o11y spec this crate implements).

use std::{fmt, net::IpAddr, sync::Arc, time::Duration};

/// Builder hook applied to the underlying [`reqwest::ClientBuilder`] before
/// it's built, e.g. to set TLS options this config doesn't expose directly.
pub type TransportModifier = Arc<dyn Fn(reqwest::ClientBuilder) -> reqwest::ClientBuilder + Send + Sync>;

/// A `RoundTripper`-style wrapper invoked with each outgoing request just
/// before it's sent. This toolkit already instruments every call with its
/// own [`Span`](ex_o11y::Span), so this hook is a no-op by default; it
/// exists for callers layering a second, lower-level tracer underneath
/// (e.g. raw wire-level packet capture) that this crate's own span model
/// doesn't cover.
pub type Tracer = Arc<dyn Fn(&reqwest::Request) + Send + Sync>;

/// Configuration for a [`Client`](crate::client::Client). There is no
/// file/CLI config loader here: callers construct this directly, the same
/// way `ex_o11y::Config` is constructed.
#[derive(Clone)]
pub struct ClientConfig {
    /// Recorded as a span tag identifying which client made the call, and
    /// used to derive the default [`Self::user_agent`].
    pub name: String,
    pub base_url: url::Url,
    /// Header name carrying [`Self::auth_token`], if any.
    pub auth_header: Option<http::HeaderName>,
    pub auth_token: Option<String>,
    pub accept_type: Option<http::HeaderValue>,
    /// Total timeout across all attempts and retries. `None` means
    /// indefinite; independent of each attempt's own
    /// [`RequestBuilder::timeout`](crate::client::RequestBuilder::timeout).
    pub timeout: Option<Duration>,
    pub max_connections_per_host: usize,
    pub user_agent: String,
    /// Disables the 10s client-side rate-limit circuit opened by a 429
    /// response. Intended for trusted internal services that already apply
    /// their own rate limiting.
    pub no_rate_limit_backoff: bool,
    /// Disables W3C `traceparent`/`baggage` header injection on outgoing
    /// requests, for talking to services outside this toolkit's trust
    /// boundary that might mishandle unfamiliar headers.
    pub disable_w3c_trace_propagation: bool,
    /// A fully-built transport to use as-is, bypassing every other knob in
    /// this struct that would otherwise configure [`reqwest::ClientBuilder`]
    /// (`max_connections_per_host`, `dial_context`, `transport_modifier`).
    /// Mainly for tests that want to inject a mocked transport.
    pub transport: Option<reqwest::Client>,
    /// Applied to the [`reqwest::ClientBuilder`] right before it's built,
    /// when [`Self::transport`] isn't set.
    pub transport_modifier: Option<TransportModifier>,
    /// Invoked with each outgoing request just before it's sent. See
    /// [`Tracer`]'s docs.
    pub tracer: Option<Tracer>,
    /// Local address new connections are bound to, the closest
    /// `reqwest::ClientBuilder` equivalent of a `DialContext` override.
    pub dial_context: Option<IpAddr>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("auth_header", &self.auth_header)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("accept_type", &self.accept_type)
            .field("timeout", &self.timeout)
            .field("max_connections_per_host", &self.max_connections_per_host)
            .field("user_agent", &self.user_agent)
            .field("no_rate_limit_backoff", &self.no_rate_limit_backoff)
            .field("disable_w3c_trace_propagation", &self.disable_w3c_trace_propagation)
            .field("transport", &self.transport.is_some())
            .field("transport_modifier", &self.transport_modifier.is_some())
            .field("tracer", &self.tracer.is_some())
            .field("dial_context", &self.dial_context)
            .finish()
    }
}

/// Window a 429 response closes the rate-limit circuit for.
pub const RATE_LIMIT_BACKOFF_WINDOW: Duration = Duration::from_secs(10);

/// Default per-attempt timeout, used when a [`RequestBuilder`](crate::client::RequestBuilder)
/// doesn't set its own.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial exponential backoff wait between retries.
pub const INITIAL_RETRY_WAIT_MS: u64 = 50;

impl ClientConfig {
    pub fn new(name: impl Into<String>, base_url: url::Url) -> Self {
        let name = name.into();
        Self {
            user_agent: format!("{name} (ex-o11y-http)"),
            name,
            base_url,
            auth_header: None,
            auth_token: None,
            accept_type: None,
            timeout: None,
            max_connections_per_host: 10,
            no_rate_limit_backoff: false,
            disable_w3c_trace_propagation: false,
            transport: None,
            transport_modifier: None,
            tracer: None,
            dial_context: None,
        }
    }

    /// Uses `transport` as-is instead of building one from this config's
    /// other connection knobs.
    pub fn with_transport(mut self, transport: reqwest::Client) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_transport_modifier(mut self, modifier: TransportModifier) -> Self {
        self.transport_modifier = Some(modifier);
        self
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_dial_context(mut self, local_addr: IpAddr) -> Self {
        self.dial_context = Some(local_addr);
        self
    }

    pub fn with_auth(mut self, header: http::HeaderName, token: impl Into<String>) -> Self {
        self.auth_header = Some(header);
        self.auth_token = Some(token.into());
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_user_agent_follows_name() {
        let config = ClientConfig::new("payments", url::Url::parse("https://example.com").unwrap());
        assert_eq!(config.user_agent, "payments (ex-o11y-http)");
        assert_eq!(config.max_connections_per_host, 10);
    }

    #[test]
    fn transport_hooks_default_to_unset_and_can_be_attached() {
        let config = ClientConfig::new("payments", url::Url::parse("https://example.com").unwrap())
            .with_transport_modifier(Arc::new(|builder| builder))
            .with_tracer(Arc::new(|_req| {}))
            .with_dial_context("127.0.0.1".parse().unwrap());
        assert!(config.transport.is_none());
        assert!(config.transport_modifier.is_some());
        assert!(config.tracer.is_some());
        assert_eq!(config.dial_context, Some("127.0.0.1".parse().unwrap()));
        // Debug must not panic on the closure-backed fields.
        assert!(format!("{config:?}").contains("transport_modifier: true"));
    }
}
