//! Blocking pipeline client.

use std::time::{Duration, Instant};

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use super::table::RowTable;
use super::wire::{PipelineRequest, decode_response};
use crate::value::SqlValue;
use crate::{Error, Result};

/// Path of the pipeline endpoint, relative to the base URL.
pub const PIPELINE_PATH: &str = "/v2/pipeline";

/// HTTP client timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Whole-request timeout in milliseconds (0 disables).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 disables).
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

/// Builds a blocking HTTP client with the configured timeouts.
#[must_use]
pub fn build_http_client(config: HttpClientConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build pipeline HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Normalizes a database URL to an `http(s)` base URL with no trailing slash.
///
/// - `libsql://host` and `wss://host` become `https://host`
/// - `ws://host` becomes `http://host`
/// - `http://` and `https://` are kept
/// - a bare host gets `https://`
///
/// Query strings and fragments are dropped, so an `authToken` in the URL never reaches
/// the request line.
///
/// # Errors
///
/// Returns [`Error::Connection`] when the result is not a valid URL.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Connection("database URL is empty".to_string()));
    }
    let lower = trimmed.to_ascii_lowercase();
    let rewritten = if let Some(rest) = strip_scheme(trimmed, &lower, "libsql://") {
        format!("https://{rest}")
    } else if let Some(rest) = strip_scheme(trimmed, &lower, "wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = strip_scheme(trimmed, &lower, "ws://") {
        format!("http://{rest}")
    } else if lower.starts_with("https://") || lower.starts_with("http://") {
        trimmed.to_string()
    } else if trimmed.contains("://") {
        return Err(Error::Connection(format!(
            "unsupported URL scheme in '{trimmed}'"
        )));
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&rewritten)
        .map_err(|e| Error::Connection(format!("invalid database URL '{trimmed}': {e}")))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::Connection(format!("database URL '{trimmed}' has no host")));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn strip_scheme<'a>(original: &'a str, lower: &str, scheme: &str) -> Option<&'a str> {
    lower
        .starts_with(scheme)
        .then(|| &original[scheme.len()..])
}

/// Client for one database behind a pipeline endpoint.
///
/// Each [`HttpTransport::execute`] is one stateless request: the statement plus a close.
/// Nothing is retried.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: String,
    token: SecretString,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Creates a transport with default client timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the URL cannot be normalized.
    pub fn new(url: &str, token: SecretString) -> Result<Self> {
        Self::with_config(url, token, HttpClientConfig::default())
    }

    /// Creates a transport with explicit client timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the URL cannot be normalized.
    pub fn with_config(url: &str, token: SecretString, config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            base_url: normalize_url(url)?,
            token,
            client: build_http_client(config),
        })
    }

    /// Normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full pipeline endpoint URL.
    #[must_use]
    pub fn pipeline_url(&self) -> String {
        format!("{}{PIPELINE_PATH}", self.base_url)
    }

    /// Runs one statement and returns its decoded result.
    ///
    /// `timeout` overrides the client's request timeout for this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Binding`] for an argument that cannot be sent, and
    /// [`Error::Transport`] for network failures, timeouts, non-2xx statuses, and
    /// malformed or failed responses.
    #[instrument(skip(self, args), fields(base_url = %self.base_url, args = args.len()))]
    pub fn execute(
        &self,
        sql: &str,
        args: &[SqlValue],
        timeout: Option<Duration>,
    ) -> Result<RowTable> {
        let envelope = PipelineRequest::single(sql, args)?;
        let mut request = self
            .client
            .post(self.pipeline_url())
            .bearer_auth(self.token.expose_secret())
            .json(&envelope);
        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            request = request.timeout(timeout);
        }

        let started = Instant::now();
        let response = request.send().map_err(|e| {
            metrics::counter!("sqlbridge_http_requests_total", "status" => "error").increment(1);
            let cause = if e.is_timeout() {
                format!("request timed out: {e}")
            } else {
                e.to_string()
            };
            Error::transport("pipeline", cause)
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::transport("pipeline", format!("failed to read body: {e}")))?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::counter!("sqlbridge_http_requests_total", "status" => status.to_string())
            .increment(1);
        metrics::histogram!("sqlbridge_http_request_duration_ms").record(elapsed_ms);
        debug!(status, elapsed_ms, "Pipeline request completed");

        decode_response(status, &body)
    }
}
