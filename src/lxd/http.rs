//! HTTP utilities for LXD REST API calls

use super::auth::TlsCredentials;
use super::envelope::{Envelope, ResponseType};
use crate::error::{Error, Result};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for LXD API calls
#[derive(Clone)]
pub struct LxdHttpClient {
    client: Client,
    base: url::Url,
    timeout: Duration,
}

impl LxdHttpClient {
    /// Create a new HTTP client for the given endpoint
    pub fn new(endpoint: &str, credentials: &TlsCredentials, timeout: Duration) -> Result<Self> {
        let base = url::Url::parse(endpoint)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported endpoint scheme '{}'",
                base.scheme()
            )));
        }

        let mut builder = Client::builder()
            .user_agent(concat!("lxdc/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .danger_accept_invalid_certs(!credentials.verify());

        if let Some(identity) = credentials.reqwest_identity()? {
            builder = builder.identity(identity);
        }
        if let Some(cert) = credentials.reqwest_server_cert()? {
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    /// Endpoint the client talks to
    pub fn base(&self) -> &url::Url {
        &self.base
    }

    /// Absolute URL for an API path (path may carry a query string)
    pub fn url(&self, path: &str) -> Result<url::Url> {
        Ok(self.base.join(path)?)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Envelope> {
        self.request(Method::GET, path, None).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Envelope> {
        self.request(Method::POST, path, body).await
    }

    /// Make a PUT request
    pub async fn put(&self, path: &str, body: &Value) -> Result<Envelope> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Make a PATCH request
    pub async fn patch(&self, path: &str, body: &Value) -> Result<Envelope> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<Envelope> {
        self.request(Method::DELETE, path, None).await
    }

    /// GET a long-polling endpoint that may hold the request for `wait`.
    pub async fn get_long_poll(&self, path: &str, wait: Duration) -> Result<Envelope> {
        self.send(Method::GET, path, None, Some(self.timeout + wait)).await
    }

    /// Send a request and decode the response envelope.
    ///
    /// Non-2xx statuses and `error` envelopes become [`Error::Api`], with
    /// 404 mapped to [`Error::NotFound`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Envelope> {
        self.send(method, path, body, None).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        tracing::debug!(%method, path, "LXD request");

        let mut request = self.client.request(method, self.url(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        decode_response(status, path, text)
    }
}

/// Turn a status + body into an envelope or a typed error.
pub(crate) fn decode_response(status: StatusCode, path: &str, text: String) -> Result<Envelope> {
    let parsed: Option<Envelope> = if text.trim().is_empty() {
        None
    } else {
        serde_json::from_str(&text).ok()
    };

    if !status.is_success() {
        // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
        tracing::debug!(%status, path, body = %sanitize_for_log(&text), "LXD API error");
        let message = parsed
            .as_ref()
            .map(|e| e.error.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                path: path.to_string(),
                message,
            });
        }
        return Err(Error::Api {
            status: status.as_u16(),
            message,
            body: text,
        });
    }

    let Some(envelope) = parsed else {
        if text.trim().is_empty() {
            return Ok(Envelope::empty_sync());
        }
        return Err(Error::UnexpectedResponse(format!(
            "{path}: body is not an LXD envelope: {}",
            sanitize_for_log(&text)
        )));
    };

    // 200 with an embedded failure
    if envelope.kind == ResponseType::Error {
        let code = u16::try_from(envelope.error_code)
            .ok()
            .filter(|c| *c >= 400)
            .unwrap_or(status.as_u16());
        if code == 404 {
            return Err(Error::NotFound {
                path: path.to_string(),
                message: envelope.error,
            });
        }
        return Err(Error::Api {
            status: code,
            message: envelope.error,
            body: text,
        });
    }

    Ok(envelope)
}

/// Format an API error for display on a terminal
pub fn format_lxd_error(error: &Error) -> String {
    match error {
        Error::NotFound { path, .. } => format!("Not found: {path}"),
        Error::AuthenticationFailed(_) => {
            "Authentication failed. Add this client's certificate to the daemon's trust store."
                .to_string()
        }
        Error::Api { status: 403, .. } => {
            "Permission denied. Check that this client is trusted for the project.".to_string()
        }
        Error::Api { status, message, .. } => {
            let sanitized = message
                .chars()
                .filter(|c| c.is_ascii_graphic() || *c == ' ')
                .take(120)
                .collect::<String>();
            format!("Request failed ({status}): {sanitized}")
        }
        other => other.to_string(),
    }
}
