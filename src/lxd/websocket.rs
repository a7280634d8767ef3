//! Operation websockets
//!
//! Exec channels are plain websockets on the operation's `websocket`
//! endpoint, authorised by a per-channel secret rather than the client
//! certificate.

use super::path::ApiPath;
use crate::error::{Error, Result};
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

/// A connected duplex byte stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path of an operation's websocket for one channel secret
pub fn websocket_path(operation_id: &str, secret: &str) -> ApiPath {
    ApiPath::collection("operations")
        .join(operation_id)
        .join("websocket")
        .query("secret", secret)
}

/// Websocket URL for an API path: `http` becomes `ws`, `https` becomes `wss`.
pub fn websocket_url(base: &url::Url, path: &ApiPath) -> Result<url::Url> {
    let mut url = base.join(&path.to_string())?;
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(Error::Config(format!(
                "no websocket scheme for '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot switch {base} to {scheme}")))?;
    Ok(url)
}

/// Open one duplex stream.
pub async fn connect(url: &url::Url, tls: Option<Arc<ClientConfig>>) -> Result<WsStream> {
    tracing::trace!(host = ?url.host_str(), path = url.path(), "Opening websocket");

    let connector = match (url.scheme(), tls) {
        ("wss", Some(config)) => Some(Connector::Rustls(config)),
        _ => None,
    };

    let (stream, _response) =
        tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, connector)
            .await?;
    Ok(stream)
}

/// Errors that only mean "the other side went away first".
///
/// These are expected while channels are being torn down after the remote
/// process exited.
pub fn is_teardown_error(err: &WsError) -> bool {
    use std::io::ErrorKind;
    use tokio_tungstenite::tungstenite::error::ProtocolError;

    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Io(io) => matches!(
            io.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
                | ErrorKind::NotConnected
        ),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
        | WsError::Protocol(ProtocolError::SendAfterClosing) => true,
        _ => false,
    }
}
