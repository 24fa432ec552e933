//! Connections to the control plane, plain or TLS.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::error::{StoreError, StoreResult};

/// A connected byte stream.
pub(crate) trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Configuration for `https` control planes.
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Trust the Mozilla root certificate store.
    pub fn with_webpki_roots() -> StoreResult<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Trust exactly the certificates in `roots`.
    pub fn with_roots(roots: rustls::RootCertStore) -> StoreResult<Self> {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| StoreError::Tls(format!("protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }
}

impl From<Arc<rustls::ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self { client_config }
    }
}

/// Opens one connection per request. `tls` is set for `https` bases.
#[derive(Clone)]
pub(crate) struct Connector {
    tls: Option<TlsConnector>,
}

impl Connector {
    pub(crate) fn plain() -> Self {
        Self { tls: None }
    }

    pub(crate) fn tls(config: TlsConfig) -> Self {
        Self {
            tls: Some(TlsConnector::from(config.client_config)),
        }
    }

    pub(crate) async fn connect(&self, url: &Url) -> StoreResult<Box<dyn Io>> {
        let host = url
            .host_str()
            .ok_or_else(|| StoreError::InvalidUrl(format!("`{url}` has no host")))?;
        // IPv6 literals come bracketed.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url
            .port_or_known_default()
            .ok_or_else(|| StoreError::InvalidUrl(format!("`{url}` has no port")))?;

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| StoreError::Request(format!("connect {host}:{port}: {e}")))?;
        let _ = tcp.set_nodelay(true);

        let Some(tls) = &self.tls else {
            return Ok(Box::new(tcp));
        };
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            StoreError::InvalidUrl(format!("`{host}` is not a TLS server name: {e}"))
        })?;
        let stream = tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| StoreError::Tls(format!("handshake with {host}:{port}: {e}")))?;
        Ok(Box::new(stream))
    }
}
