//! Error classification for the resilient HTTP client, following this
//! toolkit's `Warning`/hard-error taxonomy rather than a single opaque error
//! type.

use std::fmt;

use ex_o11y::warning::IsWarning;

/// A non-2xx response from a downstream service, or a request the client
/// itself couldn't complete.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// A non-2xx status from the downstream service.
    #[error("{0}")]
    Status(StatusError),

    /// The client-side rate-limit circuit is open: a 429 was observed within
    /// the backoff window, so this attempt was never sent to the server.
    #[error("rate-limit circuit open; last 429 was {since_last_429:?} ago")]
    ServerBackoff { since_last_429: std::time::Duration },

    /// A successful (2xx) response carried no body (HTTP 204). Surfaced as a
    /// sentinel rather than an empty-body decode failure, so callers that
    /// expect "no content" to be a valid outcome can match on it directly.
    #[error("server returned 204 No Content")]
    NoContent,

    /// The request could not be built or sent at all (DNS, TLS, connect, I/O).
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// A registered [`crate::client::Decoder`], or the final JSON
    /// deserialization step, failed to parse the response body.
    #[error("response decode failed: {0}")]
    Decode(#[source] anyhow::Error),

    /// This attempt's own timeout elapsed before a response came back.
    /// Classified as cancellation rather than a transport failure: the
    /// request may well have succeeded server-side.
    #[error("{method} {route} timed out after {attempts} attempt(s)")]
    Timeout {
        method: http::Method,
        route: String,
        attempts: u32,
        done_retrying: bool,
    },
}

/// Details of a non-2xx HTTP response, carried by [`HttpError::Status`].
#[derive(Debug, Clone)]
pub struct StatusError {
    pub method: http::Method,
    pub route: String,
    pub status: u16,
    pub attempts: u32,
    /// Whether this status is retryable in principle (`>= 500`). A
    /// retryable error that has exhausted its retry budget still carries
    /// `retryable = true`; see `done_retrying` for whether it actually will
    /// be retried again.
    pub retryable: bool,
    /// Set once the retry loop has given up. Per the warning taxonomy, this
    /// narrows which status codes still count as "expected failure": before
    /// exhaustion every `HttpError::Status` is a warning, after exhaustion
    /// only 401/403/404 remain warnings.
    pub done_retrying: bool,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} returned {} ({} attempt(s))",
            self.method, self.route, self.status, self.attempts
        )?;
        if self.done_retrying {
            write!(f, ", done retrying")?;
        }
        Ok(())
    }
}

impl HttpError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status(e) => Some(e.status),
            Self::NoContent => Some(204),
            _ => None,
        }
    }
}

impl IsWarning for HttpError {
    fn is_warning(&self) -> bool {
        match self {
            // Rate-limiting and no-content are both examples the toolkit's
            // own warning taxonomy calls out explicitly as "expected
            // failure", so they're always warnings regardless of retries.
            Self::ServerBackoff { .. } | Self::NoContent => true,
            Self::Status(e) => {
                if !e.done_retrying {
                    true
                } else {
                    matches!(e.status, 401 | 403 | 404)
                }
            }
            // A timed-out attempt is cancellation, not a hard failure: the
            // downstream call may have succeeded regardless.
            Self::Timeout { .. } => true,
            Self::Request(_) | Self::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn status(status: u16, done_retrying: bool) -> StatusError {
        StatusError {
            method: http::Method::GET,
            route: "/v1/ping".to_owned(),
            status,
            attempts: 1,
            retryable: status >= 500,
            done_retrying,
        }
    }

    #[test]
    fn status_error_is_warning_before_retries_exhausted() {
        let error = HttpError::Status(status(503, false));
        assert!(error.is_warning());
    }

    #[test]
    fn only_404_like_codes_remain_warnings_after_exhaustion() {
        assert!(HttpError::Status(status(404, true)).is_warning());
        assert!(!HttpError::Status(status(503, true)).is_warning());
    }

    #[test]
    fn server_backoff_and_no_content_are_always_warnings() {
        assert!(HttpError::ServerBackoff {
            since_last_429: std::time::Duration::from_secs(1)
        }
        .is_warning());
        assert!(HttpError::NoContent.is_warning());
    }
}
