//! The resilient HTTP client: per-request retry with exponential backoff, a
//! client-side 429 circuit, W3C trace propagation, and a status-keyed
//! decoder table so callers aren't forced through a single generic response
//! type.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use bytes::Bytes;
use ex_o11y::{
    metric,
    provider::{Context, SpanKind, StartOptions},
    span::{RecordResult, Span},
    Provider,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::{self, ClientConfig},
    error::{HttpError, StatusError},
};

/// Decodes a response body into the `Bytes` a [`Client::call`] caller's
/// generic deserialization step runs against, or fails with whatever parse
/// error the caller's format needs to report.
pub type Decoder = Arc<dyn Fn(&[u8]) -> anyhow::Result<Bytes> + Send + Sync>;

/// A single HTTP call, built up with a fluent API and executed by
/// [`Client::call`]/[`Client::call_bytes`].
///
/// Route-templating (substituting path parameters) is left to the caller:
/// build `route` with the final path already filled in, or pass a complete
/// [`Self::raw_url`] when the target isn't relative to the client's
/// `base_url`.
pub struct RequestBuilder {
    method: http::Method,
    route: String,
    raw_url: Option<url::Url>,
    body: Option<serde_json::Value>,
    raw_body: Option<Vec<u8>>,
    query: Vec<(String, String)>,
    headers: http::HeaderMap,
    cookie: Option<String>,
    timeout: Duration,
    max_elapsed_time: Option<Duration>,
    retry: bool,
    propagation: bool,
    flatten: Option<String>,
    decoders: HashMap<Option<u16>, Decoder>,
}

impl RequestBuilder {
    pub fn new(method: http::Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            raw_url: None,
            body: None,
            raw_body: None,
            query: Vec::new(),
            headers: http::HeaderMap::new(),
            cookie: None,
            timeout: config::DEFAULT_ATTEMPT_TIMEOUT,
            max_elapsed_time: None,
            retry: false,
            propagation: true,
            flatten: None,
            decoders: HashMap::new(),
        }
    }

    pub fn get(route: impl Into<String>) -> Self {
        Self::new(http::Method::GET, route)
    }

    pub fn post(route: impl Into<String>) -> Self {
        Self::new(http::Method::POST, route)
    }

    pub fn put(route: impl Into<String>) -> Self {
        Self::new(http::Method::PUT, route)
    }

    pub fn delete(route: impl Into<String>) -> Self {
        Self::new(http::Method::DELETE, route)
    }

    /// Overrides the client's `base_url` entirely for this one request.
    pub fn raw_url(mut self, url: url::Url) -> Self {
        self.raw_url = Some(url);
        self
    }

    pub fn body(mut self, value: &impl Serialize) -> Result<Self, HttpError> {
        self.body = Some(serde_json::to_value(value).map_err(|e| HttpError::Decode(e.into()))?);
        Ok(self)
    }

    pub fn raw_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn cookie(mut self, value: impl Into<String>) -> Self {
        self.cookie = Some(value.into());
        self
    }

    /// Per-attempt timeout. Defaults to 5s. Independent of
    /// [`Self::max_elapsed_time`], which bounds the whole retry loop.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_elapsed_time(mut self, max: Duration) -> Self {
        self.max_elapsed_time = Some(max);
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Disables W3C trace propagation header injection for this one request,
    /// even if the client itself has it enabled.
    pub fn propagation(mut self, enabled: bool) -> Self {
        self.propagation = enabled;
        self
    }

    /// Flattens this call's span into the caller-supplied `ctx`'s current
    /// span under `hc_<prefix>`, instead of exporting it as its own span.
    pub fn flatten(mut self, prefix: impl Into<String>) -> Self {
        self.flatten = Some(prefix.into());
        self
    }

    /// Registers a decoder for a specific response status.
    pub fn decoder(
        mut self,
        status: u16,
        decode: impl Fn(&[u8]) -> anyhow::Result<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.decoders.insert(Some(status), Arc::new(decode));
        self
    }

    /// Registers the catch-all decoder used for any 2xx response without a
    /// status-specific decoder of its own.
    pub fn success_decoder(
        mut self,
        decode: impl Fn(&[u8]) -> anyhow::Result<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.decoders.insert(None, Arc::new(decode));
        self
    }
}

struct Inner {
    config: ClientConfig,
    http: reqwest::Client,
    provider: Provider,
    /// Instant of the most recently observed 429, if the rate-limit circuit
    /// has tripped and not yet cleared.
    last_429: RwLock<Option<Instant>>,
}

/// A named HTTP client bound to one base URL. Cheap to clone: all clones
/// share the same connection pool and rate-limit circuit state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig, provider: Provider) -> Result<Self, HttpError> {
        let http = match &config.transport {
            Some(transport) => transport.clone(),
            None => {
                let mut builder = reqwest::Client::builder()
                    .user_agent(config.user_agent.clone())
                    .pool_max_idle_per_host(config.max_connections_per_host);
                if let Some(local_addr) = config.dial_context {
                    builder = builder.local_address(local_addr);
                }
                if let Some(modifier) = &config.transport_modifier {
                    builder = modifier(builder);
                }
                builder.build().map_err(HttpError::Request)?
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                provider,
                last_429: RwLock::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Issues `req` and deserializes the response body as JSON.
    pub async fn call<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        req: RequestBuilder,
    ) -> Result<T, HttpError> {
        let bytes = self.call_bytes(ctx, req).await?;
        serde_json::from_slice(&bytes).map_err(|e| HttpError::Decode(e.into()))
    }

    /// Issues `req` and returns the raw (decoded-by-table, if a decoder
    /// matched) response bytes, with no further deserialization.
    pub async fn call_bytes(&self, ctx: &Context, req: RequestBuilder) -> Result<Bytes, HttpError> {
        validate(&req)?;
        let url = self.build_url(&req)?;

        // The per-attempt `timeout` and the client's overall `Timeout`
        // (config) / per-request `max_elapsed_time` are independent budgets,
        // per §4.8/§5: either may fire first, and neither implies the other.
        // `max_elapsed_time` on the request itself takes precedence over the
        // client-level default when both are set.
        let total_budget = req.max_elapsed_time.or(self.inner.config.timeout);

        if !req.retry {
            return match total_budget {
                Some(budget) => match tokio::time::timeout(budget, self.attempt(ctx, &req, &url, 1)).await {
                    Ok(result) => result,
                    Err(_) => Err(HttpError::Timeout {
                        method: req.method.clone(),
                        route: req.route.clone(),
                        attempts: 1,
                        done_retrying: true,
                    }),
                },
                None => self.attempt(ctx, &req, &url, 1).await,
            };
        }

        let deadline = total_budget.map(|max| Instant::now() + max);
        let mut backoff = ex_std::backoff::iter_with_initial_wait_ms(config::INITIAL_RETRY_WAIT_MS);
        let mut attempt_number = 1u32;

        loop {
            let err = match self.attempt(ctx, &req, &url, attempt_number).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(mark_done_retrying(err));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(mark_done_retrying(err));
            }

            let wait = backoff.next().unwrap_or(Duration::from_secs(32));
            tokio::time::sleep(wait).await;
            attempt_number += 1;
        }
    }

    fn build_url(&self, req: &RequestBuilder) -> Result<url::Url, HttpError> {
        let mut url = match &req.raw_url {
            Some(url) => url.clone(),
            None => self
                .inner
                .config
                .base_url
                .join(req.route.trim_start_matches('/'))
                .map_err(|e| HttpError::Decode(anyhow::anyhow!("invalid route {:?}: {e}", req.route)))?,
        };
        if !req.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &req.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn time_since_last_429(&self) -> Option<Duration> {
        self.inner
            .last_429
            .read()
            .expect("rate-limit circuit lock poisoned")
            .map(|at| at.elapsed())
    }

    fn record_429(&self) {
        *self
            .inner
            .last_429
            .write()
            .expect("rate-limit circuit lock poisoned") = Some(Instant::now());
    }

    /// One full attempt: starts a client-kind span, checks the rate-limit
    /// circuit, sends the request under its own timeout, and records the
    /// result on the span before returning it.
    async fn attempt(
        &self,
        ctx: &Context,
        req: &RequestBuilder,
        url: &url::Url,
        attempt_number: u32,
    ) -> Result<Bytes, HttpError> {
        let (attempt_ctx, span) = self.inner.provider.start(
            ctx,
            format!("{} {}", req.method, req.route),
            StartOptions { kind: SpanKind::Client },
        );

        if let Some(prefix) = &req.flatten {
            if let Some(parent) = ctx.span() {
                span.flatten(parent, format!("hc_{prefix}"));
            }
        }

        span.record_metric(
            metric::Descriptor::timer("httpclient")
                .with_tags(["client", "route", "method", "status", "retry"]),
        );
        span.add_raw_field("client", &self.inner.config.name);
        span.add_raw_field("route", &req.route);
        span.add_raw_field("method", req.method.as_str());
        span.add_raw_field("attempt", attempt_number);
        span.add_raw_field("retry", req.retry);

        let result = self
            .attempt_inner(&attempt_ctx, req, url, attempt_number, &span)
            .await;
        record_attempt_result(&span, &result);
        span.end();
        result
    }

    async fn attempt_inner(
        &self,
        ctx: &Context,
        req: &RequestBuilder,
        url: &url::Url,
        attempt_number: u32,
        span: &Span,
    ) -> Result<Bytes, HttpError> {
        if !self.inner.config.no_rate_limit_backoff {
            if let Some(since) = self.time_since_last_429() {
                if since < config::RATE_LIMIT_BACKOFF_WINDOW {
                    return Err(HttpError::ServerBackoff { since_last_429: since });
                }
            }
        }

        let mut request = self.inner.http.request(req.method.clone(), url.clone());
        if let Some(body) = &req.body {
            request = request.json(body);
        } else if let Some(raw) = &req.raw_body {
            request = request.body(raw.clone());
        }
        request = request.headers(req.headers.clone());
        if let Some(cookie) = &req.cookie {
            request = request.header(http::header::COOKIE, cookie.clone());
        }
        if let (Some(header), Some(token)) =
            (&self.inner.config.auth_header, &self.inner.config.auth_token)
        {
            request = request.header(header.clone(), token.clone());
        }
        if let Some(accept) = &self.inner.config.accept_type {
            request = request.header(http::header::ACCEPT, accept.clone());
        }
        if req.propagation && !self.inner.config.disable_w3c_trace_propagation {
            let propagation = self.inner.provider.helpers().extract_propagation(ctx);
            for (key, value) in propagation.iter() {
                request = request.header(key.clone(), value.clone());
            }
        }

        let content_length = req
            .body
            .as_ref()
            .and_then(|b| serde_json::to_vec(b).ok())
            .map(|bytes| bytes.len())
            .or_else(|| req.raw_body.as_ref().map(Vec::len));

        span.add_raw_field("http.scheme", url.scheme());
        span.add_raw_field("http.host", url.host_str().unwrap_or_default());
        span.add_raw_field("http.target", url.path());
        span.add_raw_field("http.url", url.as_str());
        span.add_raw_field("user_agent", &self.inner.config.user_agent);
        span.add_field("content_length", content_length.map(|n| n as i64));

        if let Some(tracer) = &self.inner.config.tracer {
            if let Some(built) = request.try_clone().and_then(|b| b.build().ok()) {
                tracer(&built);
            }
        }

        let outcome = tokio::time::timeout(req.timeout, async {
            let response = request.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        })
        .await;

        let (status, bytes) = match outcome {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(HttpError::Request(e)),
            Err(_) => {
                return Err(HttpError::Timeout {
                    method: req.method.clone(),
                    route: req.route.clone(),
                    attempts: attempt_number,
                    done_retrying: false,
                })
            }
        };

        span.add_raw_field("status", status.as_u16());

        if status.as_u16() == 429 {
            self.record_429();
        }

        if status.is_success() {
            if status.as_u16() == 204 {
                return Err(HttpError::NoContent);
            }
            return run_decoder(req, status.as_u16(), &bytes).map_err(HttpError::Decode);
        }

        if let Some(decoder) = req
            .decoders
            .get(&Some(status.as_u16()))
            .or_else(|| req.decoders.get(&None))
        {
            if let Err(e) = decoder(&bytes) {
                span.add_raw_field("decode_error", e);
            }
        }

        Err(HttpError::Status(StatusError {
            method: req.method.clone(),
            route: req.route.clone(),
            status: status.as_u16(),
            attempts: attempt_number,
            retryable: status.as_u16() >= 500,
            done_retrying: false,
        }))
    }
}

/// Resolves the decoder for a successful response: a status-specific
/// decoder takes precedence, then the catch-all `None` entry, then the raw
/// bytes unchanged.
fn run_decoder(req: &RequestBuilder, status: u16, bytes: &Bytes) -> anyhow::Result<Bytes> {
    match req.decoders.get(&Some(status)).or_else(|| req.decoders.get(&None)) {
        Some(decoder) => decoder(bytes),
        None => Ok(bytes.clone()),
    }
}

fn validate(req: &RequestBuilder) -> Result<(), HttpError> {
    if req.method == http::Method::GET && (req.body.is_some() || req.raw_body.is_some()) {
        return Err(HttpError::Decode(anyhow::anyhow!(
            "GET requests may not carry a body"
        )));
    }
    if req.body.is_some() && req.raw_body.is_some() {
        return Err(HttpError::Decode(anyhow::anyhow!(
            "body and raw_body are mutually exclusive"
        )));
    }
    Ok(())
}

fn is_retryable(err: &HttpError) -> bool {
    match err {
        HttpError::Status(e) => e.retryable,
        HttpError::Request(_) | HttpError::Timeout { .. } => true,
        HttpError::ServerBackoff { .. } | HttpError::NoContent | HttpError::Decode(_) => false,
    }
}

fn mark_done_retrying(err: HttpError) -> HttpError {
    match err {
        HttpError::Status(mut e) => {
            e.done_retrying = true;
            HttpError::Status(e)
        }
        HttpError::Timeout {
            method,
            route,
            attempts,
            ..
        } => HttpError::Timeout {
            method,
            route,
            attempts,
            done_retrying: true,
        },
        other => other,
    }
}

/// Sets the span's `result` field to exactly one of `success`/`error`/
/// `canceled`, and records the error/warning field via [`RecordResult`].
fn record_attempt_result(span: &Span, result: &Result<Bytes, HttpError>) {
    result.record_result(span);
    let result_label = match result {
        Ok(_) => "success",
        Err(HttpError::Timeout { .. }) => "canceled",
        Err(_) => "error",
    };
    span.add_raw_field("result", result_label);
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;

    use ex_o11y::Config;

    use super::*;

    fn test_client(base_url: url::Url) -> Client {
        let provider = Provider::new(Config::for_testing()).expect("valid test config");
        Client::new(ClientConfig::new("test", base_url), provider).expect("valid client config")
    }

    #[test]
    fn get_request_with_body_fails_validation() {
        let req = RequestBuilder::get("/ping").body(&serde_json::json!({"x": 1})).unwrap();
        assert!(validate(&req).is_err());
    }

    #[test]
    fn body_and_raw_body_are_mutually_exclusive() {
        let req = RequestBuilder::post("/ping")
            .body(&serde_json::json!({"x": 1}))
            .unwrap()
            .raw_body(b"raw".to_vec());
        assert!(validate(&req).is_err());
    }

    #[test]
    fn timeout_is_always_retryable() {
        let err = HttpError::Timeout {
            method: http::Method::GET,
            route: "/x".to_owned(),
            attempts: 1,
            done_retrying: false,
        };
        assert!(is_retryable(&err));
    }

    #[test]
    fn server_backoff_is_not_retried_again() {
        let err = HttpError::ServerBackoff {
            since_last_429: Duration::from_secs(1),
        };
        assert!(!is_retryable(&err));
    }

    #[tokio::test]
    async fn client_level_timeout_bounds_a_non_retrying_call() {
        // Bind but never accept: the connect (or at least the response)
        // never completes, so the client-level `timeout` budget is what
        // ends the call rather than the server actually responding.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
        let addr = listener.local_addr().expect("listener has local addr");
        let base = url::Url::parse(&format!("http://{addr}/")).expect("valid url");

        let provider = Provider::new(Config::for_testing()).expect("valid test config");
        let mut config = ClientConfig::new("test", base);
        config.timeout = Some(Duration::from_millis(20));
        let client = Client::new(config, provider).expect("valid client config");

        let ctx = Context::new();
        let req = RequestBuilder::get("/ping");
        let err = client.call_bytes(&ctx, req).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::Timeout {
                done_retrying: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn retries_503_twice_then_succeeds_after_exactly_three_attempts() {
        use std::io::{Read, Write};

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
        let addr = listener.local_addr().expect("listener has local addr");

        std::thread::spawn(move || {
            for status in ["503 Service Unavailable", "503 Service Unavailable", "200 OK"] {
                let (mut stream, _) = listener.accept().expect("accept connection");
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let body = "{}";
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        let base = url::Url::parse(&format!("http://{addr}/")).expect("valid url");
        let provider = Provider::for_testing();
        let client = Client::new(ClientConfig::new("test", base), provider.clone()).expect("valid client config");

        let ctx = Context::new();
        let (ctx, root) = provider.start(&ctx, "call", StartOptions { kind: SpanKind::Internal });

        let result = client.call_bytes(&ctx, RequestBuilder::get("/ping").retry(true)).await;
        root.end();

        assert!(result.is_ok(), "expected eventual success, got {result:?}");

        let exported = provider.exported_spans();
        let attempt_spans = exported.iter().filter(|s| s.name == "GET /ping").count();
        assert_eq!(attempt_spans, 3, "expected exactly 3 attempt spans");
        assert_eq!(exported.len(), 4, "expected the root span plus its 3 attempt children");
        assert!(exported.iter().all(|s| s.trace_id == root.trace_id()));
    }

    #[tokio::test]
    async fn rate_limit_circuit_opens_after_429() {
        // A listener that is never accepted from: any connection attempt
        // after the first will simply queue, letting this test observe the
        // circuit tripping without needing a real HTTP server.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
        let addr = listener.local_addr().expect("listener has local addr");
        let base = url::Url::parse(&format!("http://{addr}/")).expect("valid url");
        let client = test_client(base);

        client.record_429();
        let since = client.time_since_last_429().expect("429 recorded");
        assert!(since < config::RATE_LIMIT_BACKOFF_WINDOW);

        let ctx = Context::new();
        let req = RequestBuilder::get("/ping");
        let err = client.call_bytes(&ctx, req).await.unwrap_err();
        assert!(matches!(err, HttpError::ServerBackoff { .. }));
    }
}
