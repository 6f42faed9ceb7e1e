//! Wires `ex-o11y` and `ex-o11y-http` together: a root span wrapping one
//! outgoing HTTP call, exported to stdout via the text exporter.

use ex_o11y::{
    provider::{Context, SpanKind, StartOptions},
    Config, Provider,
};
use ex_o11y_http::{Client, ClientConfig, RequestBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ex_logger::init();

    let provider = Provider::new(Config {
        service_name: "demos-basic".to_owned(),
        ..Config::default()
    })?;

    let ctx = Context::new();
    let (ctx, root) = provider.start(&ctx, "demo.run", StartOptions { kind: SpanKind::Internal });
    root.add_field("env", "local");

    let client = Client::new(
        ClientConfig::new("httpbin", url::Url::parse("https://httpbin.org/")?),
        provider.clone(),
    )?;

    let req = RequestBuilder::get("get").retry(true).flatten("httpbin");
    match client.call_bytes(&ctx, req).await {
        Ok(bytes) => {
            root.add_field("response_bytes", bytes.len() as i64);
            tracing::info!(bytes = bytes.len(), "request succeeded");
        }
        Err(e) => {
            root.add_raw_field("demo_error", &e);
            tracing::warn!(error = %e, "request failed");
        }
    }

    root.end();
    provider.close().await;
    Ok(())
}
