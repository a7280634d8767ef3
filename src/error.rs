//! Error types for lxdc.

use thiserror::Error;

/// Result type alias for lxdc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client, the entity model, operations and exec.
#[derive(Debug, Error)]
pub enum Error {
    /// The daemon answered with a non-2xx status or an `error` envelope.
    #[error("LXD API error {status}: {message}")]
    Api {
        /// HTTP status code of the response
        status: u16,
        /// Error string from the envelope (or the status reason)
        message: String,
        /// Raw response body, kept for introspection
        body: String,
    },

    /// The requested resource does not exist (HTTP 404).
    #[error("not found: {path}: {message}")]
    NotFound {
        /// Request path that produced the 404
        path: String,
        /// Error string from the envelope
        message: String,
    },

    /// The daemon does not advertise a required API extension.
    #[error("API extension not available: {0}")]
    ExtensionNotAvailable(String),

    /// A waited operation reached a Failure or Cancelled state.
    #[error("operation {id} failed: {message}")]
    OperationFailed {
        /// Operation id
        id: String,
        /// Error string supplied by the daemon
        message: String,
    },

    /// An attribute name that the entity schema does not declare.
    #[error("unknown attribute '{name}' on {kind}")]
    UnknownAttribute {
        /// Entity kind name
        kind: &'static str,
        /// Attribute name
        name: String,
    },

    /// Caller misuse detected before any network activity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity was deleted or its client has been dropped.
    #[error("entity is no longer bound to a client")]
    Unbound,

    /// The daemon could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The daemon rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Websocket error on an exec channel
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// TLS material could not be loaded or assembled
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the 404 specialization.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// HTTP status of an API-class error, if any.
    pub fn api_status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {err}"))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}
