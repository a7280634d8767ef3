//! LXD Authentication
//!
//! Handles TLS client credentials (certificate + key PEM files), the trust
//! settings for the daemon's certificate, and the rustls configuration used
//! by websocket channels.

use crate::config::Config;
use crate::error::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::path::Path;
use std::sync::Arc;

/// TLS material loaded from the configured PEM files
#[derive(Clone, Default)]
pub struct TlsCredentials {
    cert_pem: Option<Vec<u8>>,
    key_pem: Option<Vec<u8>>,
    server_cert_pem: Option<Vec<u8>>,
    verify: bool,
}

impl std::fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("TlsCredentials")
            .field("has_identity", &self.has_identity())
            .field("has_server_cert", &self.server_cert_pem.is_some())
            .field("verify", &self.verify)
            .finish()
    }
}

impl TlsCredentials {
    /// Load credentials named by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let (cert_pem, key_pem) = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => (Some(read_pem(cert)?), Some(read_pem(key)?)),
            (None, None) => (None, None),
            _ => {
                return Err(Error::Config(
                    "cert and key must be configured together".into(),
                ))
            }
        };
        let server_cert_pem = config.server_cert.as_deref().map(read_pem).transpose()?;

        Ok(Self {
            cert_pem,
            key_pem,
            server_cert_pem,
            verify: config.verify,
        })
    }

    pub fn has_identity(&self) -> bool {
        self.cert_pem.is_some() && self.key_pem.is_some()
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    /// Client certificate PEM, as posted to `/1.0/certificates`
    pub fn cert_pem(&self) -> Option<&[u8]> {
        self.cert_pem.as_deref()
    }

    /// Identity for the reqwest client (certificate followed by key)
    pub fn reqwest_identity(&self) -> Result<Option<reqwest::Identity>> {
        let (Some(cert), Some(key)) = (&self.cert_pem, &self.key_pem) else {
            return Ok(None);
        };
        let mut pem = cert.clone();
        pem.push(b'\n');
        pem.extend_from_slice(key);
        reqwest::Identity::from_pem(&pem)
            .map(Some)
            .map_err(|e| Error::Tls(format!("invalid client identity: {e}")))
    }

    /// Extra trusted root for the reqwest client
    pub fn reqwest_server_cert(&self) -> Result<Option<reqwest::Certificate>> {
        self.server_cert_pem
            .as_deref()
            .map(|pem| {
                reqwest::Certificate::from_pem(pem)
                    .map_err(|e| Error::Tls(format!("invalid server certificate: {e}")))
            })
            .transpose()
    }

    /// rustls configuration for `wss://` channels, mirroring the HTTP
    /// client's identity and verification settings.
    pub fn rustls_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let builder = if self.verify {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            if let Some(pem) = &self.server_cert_pem {
                for cert in CertificateDer::pem_slice_iter(pem) {
                    let cert = cert.map_err(|e| Error::Tls(format!("server certificate: {e}")))?;
                    roots.add(cert)?;
                }
            }
            builder.with_root_certificates(roots)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        };

        let config = match (&self.cert_pem, &self.key_pem) {
            (Some(cert), Some(key)) => {
                let chain = CertificateDer::pem_slice_iter(cert)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::Tls(format!("client certificate: {e}")))?;
                let key = PrivateKeyDer::from_pem_slice(key)
                    .map_err(|e| Error::Tls(format!("client key: {e}")))?;
                builder.with_client_auth_cert(chain, key)?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))
}

/// Verifier used when `verify` is off: signatures are still checked, the
/// certificate chain is not.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
