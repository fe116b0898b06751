//! TLS 网关连接器（客户端证书双向认证）

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::transport::{GatewayConnector, GatewayStream, TransportError};

pub struct TlsGatewayConnector {
    host: String,
    port: u16,
    cert_file: PathBuf,
    key_file: PathBuf,
    ca_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl TlsGatewayConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            ca_file: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_ca_file(mut self, ca_file: Option<PathBuf>) -> Self {
        self.ca_file = ca_file;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// 每次连接都重新读取证书文件，证书轮换后无需重启
    fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let certs = read_certificates(&self.cert_file)?;
        if certs.is_empty() {
            return Err(TransportError::InvalidCredentials(format!(
                "no certificates found in {}",
                self.cert_file.display()
            )));
        }
        let key = read_private_key(&self.key_file)?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca_file) = &self.ca_file {
            for cert in read_certificates(ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| TransportError::Tls(format!("failed to add CA certificate: {e}")))?;
            }
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| TransportError::InvalidCredentials(e.to_string()))?;
        Ok(Arc::new(config))
    }
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = std::fs::read(path).map_err(|e| {
        TransportError::InvalidCredentials(format!("cannot read {}: {e}", path.display()))
    })?;
    CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TransportError::InvalidCredentials(format!(
                "failed to parse certificates in {}: {e}",
                path.display()
            ))
        })
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let pem = std::fs::read(path).map_err(|e| {
        TransportError::InvalidCredentials(format!("cannot read {}: {e}", path.display()))
    })?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|e| {
        TransportError::InvalidCredentials(format!(
            "failed to parse private key in {}: {e}",
            path.display()
        ))
    })
}

#[async_trait]
impl GatewayConnector for TlsGatewayConnector {
    async fn connect(&self) -> Result<Box<dyn GatewayStream>, TransportError> {
        let config = self.client_config()?;

        let tcp_stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;
        tcp_stream.set_nodelay(true)?;

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;

        let tls_stream = timeout(
            self.connect_timeout,
            TlsConnector::from(config).connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        debug!(endpoint = %self.endpoint(), "tls handshake completed");
        Ok(Box::new(tls_stream))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
