//! A resilient HTTP client built on top of `ex-o11y`'s `Provider`: every
//! call gets its own client-kind span, W3C trace propagation on its
//! outgoing headers, a client-side 429 circuit, and exponential-backoff
//! retries.

#![forbid(unsafe_code)]

/// The [`Client`](client::Client) and its [`RequestBuilder`](client::RequestBuilder).
pub mod client;
/// Per-client configuration.
pub mod config;
/// The client's error taxonomy and its [`IsWarning`](ex_o11y::warning::IsWarning) impl.
pub mod error;

pub use crate::{
    client::{Client, RequestBuilder},
    config::ClientConfig,
    error::HttpError,
};
