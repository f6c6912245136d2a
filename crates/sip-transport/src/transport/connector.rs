//! Byte-stream establishment for the WebSocket transport
//!
//! The transport does not care how its stream was opened. [`TlsConnector`]
//! is the production path (TCP, then TLS for `wss://`); [`PreparedStream`]
//! hands out a stream that already exists, which is how tests and embedders
//! with their own networking plug in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// A bidirectional byte stream the transport can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased stream handed from a connector to the transport
pub type BoxedStream = Box<dyn AsyncStream>;

/// Where a WebSocket URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address, without IPv6 brackets
    pub host: String,
    /// TCP port
    pub port: u16,
    /// `wss://` (TLS) or `ws://`
    pub secure: bool,
    /// Path plus optional query, never empty
    pub resource: String,
}

impl Endpoint {
    /// Parse a `ws://` or `wss://` URL
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        let secure = match parsed.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(Error::InvalidUrl(format!(
                    "unsupported scheme '{}' in {}",
                    other, url
                )))
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("missing host in {}", url)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidUrl(format!("missing port in {}", url)))?;

        let mut resource = parsed.path().to_string();
        if resource.is_empty() {
            resource.push('/');
        }
        if let Some(query) = parsed.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            host,
            port,
            secure,
            resource,
        })
    }

    fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    /// Value for the `Host` header; the port is included only when it is not
    /// the scheme default
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{}://{}{}", scheme, self.host_header(), self.resource)
    }
}

/// Opens the byte stream for a transport
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Connect to `endpoint`, completing TLS if the endpoint is secure
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream>;
}

/// TCP + rustls connector trusting the webpki root set
#[derive(Clone)]
pub struct TlsConnector {
    tls: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Build a connector with the bundled web PKI roots
    pub fn new() -> Result<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            tls: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TlsConnector")
    }
}

#[async_trait]
impl StreamConnector for TlsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream> {
        let target = format!("{}:{}", endpoint.host, endpoint.port);
        debug!("Opening TCP connection to {}", target);

        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| Error::ConnectFailed(target.clone(), e))?;
        tcp.set_nodelay(true)?;

        if !endpoint.secure {
            info!("Connected to {} (plain TCP)", target);
            return Ok(Box::new(tcp));
        }

        let server_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
            .map_err(|e| Error::Tls(format!("invalid server name '{}': {}", endpoint.host, e)))?;
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;

        info!("Connected to {} (TLS)", target);
        Ok(Box::new(tls))
    }
}

/// Connector that yields one already-established stream
///
/// A second `connect` fails with [`Error::TransportClosed`].
pub struct PreparedStream {
    stream: Mutex<Option<BoxedStream>>,
}

impl PreparedStream {
    /// Wrap an existing stream
    pub fn new<S: AsyncStream + 'static>(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(Box::new(stream))),
        }
    }
}

impl fmt::Debug for PreparedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStream")
            .field("available", &self.stream.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl StreamConnector for PreparedStream {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream> {
        debug!("Using prepared stream for {}", endpoint);
        self.stream.lock().take().ok_or(Error::TransportClosed)
    }
}
