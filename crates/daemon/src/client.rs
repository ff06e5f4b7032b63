//! HTTP client for talking to a running daemon.
//!
//! Used by the `status` and `sessions` subcommands. Requests and responses
//! are the [`protocol`] types the server speaks.

use std::time::Duration;

use protocol::{ApiErrorBody, HealthResponse, ListSessionsResponse, SessionView};
use reqwest::{Response, StatusCode};
use thiserror::Error;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Errors from [`DaemonClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing answered at the configured address.
    #[error("daemon is not reachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The daemon answered with an error status.
    #[error("daemon returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A client for the daemon's JSON API.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    /// Create a client for the daemon at `base_url` (e.g. `http://127.0.0.1:8081`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Health and version of the daemon.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = self.url("/health");
        let response = self.send(self.http.get(&url), &url).await?;
        Ok(response.json().await?)
    }

    /// Sessions in display order.
    pub async fn list_sessions(&self) -> Result<Vec<SessionView>, ClientError> {
        let url = self.url("/sessions");
        let response = self.send(self.http.get(&url), &url).await?;
        let body: ListSessionsResponse = response.json().await?;
        Ok(body.sessions)
    }

    /// Kill a session. Killing an unknown session succeeds.
    pub async fn kill_session(&self, name: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/sessions/{}", encode_segment(name)));
        self.send(self.http.delete(&url), &url).await?;
        Ok(())
    }

    /// Send a request and turn error statuses into [`ClientError::Api`].
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Response, ClientError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ClientError::Unreachable {
                    url: url.to_string(),
                    source: e,
                }
            } else {
                ClientError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => match body.details {
                Some(details) => format!("{}: {}", body.error, details),
                None => body.error,
            },
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(ClientError::Api { status, message })
    }
}

/// Percent-encode a session name for use as one path segment.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
