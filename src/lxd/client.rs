//! LXD Client
//!
//! Main client for interacting with the daemon, combining the HTTP layer,
//! TLS credentials, project scoping and the cached host information.

use super::auth::TlsCredentials;
use super::envelope::Envelope;
use super::http::LxdHttpClient;
use super::path::ApiPath;
use super::websocket::{self, WsStream};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::WarningSink;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;

/// Daemon information from `GET /1.0`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub api_extensions: Vec<String>,
    #[serde(default)]
    pub api_status: String,
    #[serde(default)]
    pub api_version: String,
    /// `trusted` or `untrusted`
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub auth_methods: Vec<String>,
    #[serde(default)]
    pub environment: Value,
}

/// Main LXD client
///
/// Cheap to clone; all clones share one connection pool, one host-info
/// cache and one warning sink.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    http: LxdHttpClient,
    credentials: TlsCredentials,
    project: Option<String>,
    host_info: RwLock<HostInfo>,
    warnings: WarningSink,
    poll_interval: Duration,
    operation_wait: Duration,
}

impl Client {
    /// Connect to the daemon described by `config`.
    ///
    /// Fetches `/1.0` once; the advertised extensions are cached for the
    /// lifetime of the client.
    pub async fn new(config: Config) -> Result<Self> {
        let credentials = TlsCredentials::from_config(&config)?;
        let http = LxdHttpClient::new(&config.endpoint, &credentials, config.timeout())?;

        let client = Self {
            inner: Arc::new(ClientInner {
                http,
                credentials,
                project: config.project.clone(),
                host_info: RwLock::new(HostInfo::default()),
                warnings: WarningSink::new(config.warnings),
                poll_interval: config.poll_interval(),
                operation_wait: Duration::from_secs(config.operation_wait_secs),
            }),
        };

        let info = client.fetch_host_info().await?;
        tracing::info!(
            endpoint = %config.endpoint,
            api_version = %info.api_version,
            auth = %info.auth,
            extensions = info.api_extensions.len(),
            "Connected to LXD"
        );
        *client.inner.host_info.write().await = info;

        Ok(client)
    }

    async fn fetch_host_info(&self) -> Result<HostInfo> {
        let envelope = match self.get(&ApiPath::root()).await {
            Ok(envelope) => envelope,
            Err(Error::Http(e)) => return Err(Error::ConnectionFailed(e.to_string())),
            Err(Error::Api { status: 401 | 403, message, .. }) => {
                return Err(Error::AuthenticationFailed(message))
            }
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_value(envelope.metadata)?)
    }

    /// Re-read `/1.0`, e.g. after the daemon gained an extension.
    pub async fn refresh_host_info(&self) -> Result<HostInfo> {
        let info = self.fetch_host_info().await?;
        *self.inner.host_info.write().await = info.clone();
        Ok(info)
    }

    /// Cached host information
    pub async fn host_info(&self) -> HostInfo {
        self.inner.host_info.read().await.clone()
    }

    /// Whether the daemon trusts this client's certificate
    pub async fn trusted(&self) -> bool {
        self.inner.host_info.read().await.auth == "trusted"
    }

    /// Check the cached extension list.
    pub async fn has_api_extension(&self, name: &str) -> bool {
        self.inner
            .host_info
            .read()
            .await
            .api_extensions
            .iter()
            .any(|e| e == name)
    }

    /// Fail with [`Error::ExtensionNotAvailable`] unless the extension is advertised.
    pub async fn assert_has_api_extension(&self, name: &str) -> Result<()> {
        if self.has_api_extension(name).await {
            Ok(())
        } else {
            Err(Error::ExtensionNotAvailable(name.to_string()))
        }
    }

    /// Add this client's certificate to the daemon's trust store using a
    /// trust password.
    pub async fn authenticate(&self, password: &str) -> Result<()> {
        if self.trusted().await {
            return Ok(());
        }
        let Some(cert) = self.inner.credentials.cert_pem() else {
            return Err(Error::AuthenticationFailed(
                "no client certificate configured".into(),
            ));
        };

        let body = json!({
            "type": "client",
            "certificate": pem_body(cert),
            "password": password,
        });
        match self.post(&ApiPath::collection("certificates"), Some(&body)).await {
            Ok(_) => {}
            Err(Error::Api { status: 401 | 403, message, .. }) => {
                return Err(Error::AuthenticationFailed(message))
            }
            Err(e) => return Err(e),
        }

        self.refresh_host_info().await?;
        if self.trusted().await {
            Ok(())
        } else {
            Err(Error::AuthenticationFailed(
                "certificate was not accepted".into(),
            ))
        }
    }

    /// Project requests are scoped to
    pub fn project(&self) -> Option<&str> {
        self.inner.project.as_deref()
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &url::Url {
        self.inner.http.base()
    }

    pub fn warnings(&self) -> &WarningSink {
        &self.inner.warnings
    }

    /// Bounded short-poll interval
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Server-side timeout used for `/wait` long polls
    pub fn operation_wait(&self) -> Duration {
        self.inner.operation_wait
    }

    /// Add the project query parameter when one is configured.
    fn scoped(&self, path: &ApiPath) -> String {
        match &self.inner.project {
            Some(project) if path.query_value("project").is_none() => {
                path.clone().query("project", project.clone()).to_string()
            }
            _ => path.to_string(),
        }
    }

    /// Make a GET request
    pub async fn get(&self, path: &ApiPath) -> Result<Envelope> {
        self.inner.http.get(&self.scoped(path)).await
    }

    /// GET an endpoint the daemon may hold open for up to `wait`
    pub async fn get_long_poll(&self, path: &ApiPath, wait: Duration) -> Result<Envelope> {
        self.inner.http.get_long_poll(&self.scoped(path), wait).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &ApiPath, body: Option<&Value>) -> Result<Envelope> {
        self.inner.http.post(&self.scoped(path), body).await
    }

    /// Make a PUT request
    pub async fn put(&self, path: &ApiPath, body: &Value) -> Result<Envelope> {
        self.inner.http.put(&self.scoped(path), body).await
    }

    /// Make a PATCH request
    pub async fn patch(&self, path: &ApiPath, body: &Value) -> Result<Envelope> {
        self.inner.http.patch(&self.scoped(path), body).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &ApiPath) -> Result<Envelope> {
        self.inner.http.delete(&self.scoped(path)).await
    }

    /// Absolute websocket URL for an operation channel secret
    pub fn websocket_url(&self, operation_id: &str, secret: &str) -> Result<url::Url> {
        websocket::websocket_url(
            self.endpoint(),
            &websocket::websocket_path(operation_id, secret),
        )
    }

    /// Open the duplex stream for one operation channel.
    pub async fn open_websocket(&self, operation_id: &str, secret: &str) -> Result<WsStream> {
        let url = self.websocket_url(operation_id, secret)?;
        let tls = match url.scheme() {
            "wss" => Some(self.inner.credentials.rustls_config()?),
            _ => None,
        };
        websocket::connect(&url, tls).await
    }

    /// Non-owning handle, as held by entities.
    pub(crate) fn downgrade(&self) -> Weak<ClientInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(handle: &Weak<ClientInner>) -> Option<Self> {
        handle.upgrade().map(|inner| Self { inner })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.http.base().as_str())
            .field("project", &self.inner.project)
            .finish()
    }
}

/// Base64 body of a PEM certificate, as `/1.0/certificates` expects it.
fn pem_body(pem: &[u8]) -> String {
    String::from_utf8_lossy(pem)
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .map(str::trim)
        .collect()
}
