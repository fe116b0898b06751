//! 网关传输层
//!
//! 一个 [`GatewayTransport`] 独占一条到网关的加密连接，维护
//! `Disconnected → Connecting → Connected → Invalid → Disconnected` 状态机。
//! 具体的连接方式（TLS、测试用内存管道）由 [`GatewayConnector`] 提供。

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::AlertDescription;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use turbo_push_core::{FailureClass, RetryableError};

use super::codec::{CodecError, ERROR_RESPONSE_LENGTH, ErrorFrame, decode_error};

/// 网关连接流
pub trait GatewayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> GatewayStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// 网关连接工厂
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn GatewayStream>, TransportError>;

    /// 用于日志的端点描述
    fn endpoint(&self) -> String;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid client credentials: {0}")]
    InvalidCredentials(String),
    #[error("gateway operation timed out")]
    Timeout,
    #[error("gateway i/o error: {0}")]
    Io(io::Error),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("not connected to gateway")]
    NotConnected,
}

impl TransportError {
    /// 区分证书问题与普通网络错误
    pub fn from_io(err: io::Error) -> Self {
        let tls_error = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>());
        match tls_error {
            Some(tls) if is_credential_error(tls) => {
                TransportError::InvalidCredentials(tls.to_string())
            }
            Some(tls) => TransportError::Tls(tls.to_string()),
            None => TransportError::Io(err),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::from_io(err)
    }
}

impl RetryableError for TransportError {
    fn failure_class(&self) -> FailureClass {
        match self {
            TransportError::InvalidCredentials(_) => FailureClass::Auth,
            _ => FailureClass::Transient,
        }
    }
}

fn is_credential_error(err: &rustls::Error) -> bool {
    match err {
        rustls::Error::AlertReceived(alert) => matches!(
            alert,
            AlertDescription::BadCertificate
                | AlertDescription::UnsupportedCertificate
                | AlertDescription::CertificateRevoked
                | AlertDescription::CertificateExpired
                | AlertDescription::CertificateUnknown
                | AlertDescription::UnknownCA
                | AlertDescription::AccessDenied
                | AlertDescription::CertificateRequired
        ),
        rustls::Error::InvalidCertificate(_) => true,
        _ => false,
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    /// 证书 / 私钥无效，需等待证书轮换
    Invalid,
}

/// 一次读取的结果
#[derive(Debug)]
pub enum GatewayInput {
    Frame(ErrorFrame),
    /// 对端关闭连接
    Closed,
    /// 长度不足或命令字节错误
    Malformed(CodecError),
    Failed(TransportError),
}

pub struct GatewayTransport {
    connector: Arc<dyn GatewayConnector>,
    stream: Option<Box<dyn GatewayStream>>,
    state: TransportState,
    write_timeout: Duration,
}

impl GatewayTransport {
    pub fn new(connector: Arc<dyn GatewayConnector>, write_timeout: Duration) -> Self {
        Self {
            connector,
            stream: None,
            state: TransportState::Disconnected,
            write_timeout,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected && self.stream.is_some()
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;
        self.state = TransportState::Connecting;
        match self.connector.connect().await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = TransportState::Connected;
                Ok(())
            }
            Err(err) => {
                self.state = match err.failure_class() {
                    FailureClass::Auth => TransportState::Invalid,
                    _ => TransportState::Disconnected,
                };
                Err(err)
            }
        }
    }

    /// 断开并重新连接
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;
        self.connect().await
    }

    /// 幂等；`Invalid` 状态保持不变
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // 对端可能早已断开，关闭失败无需处理
            let _ = tokio::time::timeout(Duration::from_secs(1), stream.shutdown()).await;
            debug!(endpoint = %self.connector.endpoint(), "gateway connection closed");
        }
        if self.state != TransportState::Invalid {
            self.state = TransportState::Disconnected;
        }
    }

    /// 单次读取最多 6 字节；未连接时永远挂起
    ///
    /// 可安全地放在 `select!` 中被取消。
    pub async fn read_error_frame(&mut self) -> GatewayInput {
        let Some(stream) = self.stream.as_mut() else {
            return std::future::pending().await;
        };
        let mut buf = [0u8; ERROR_RESPONSE_LENGTH];
        match stream.read(&mut buf).await {
            Ok(0) => GatewayInput::Closed,
            Ok(n) => match decode_error(&buf[..n]) {
                Ok(frame) => GatewayInput::Frame(frame),
                Err(err) => GatewayInput::Malformed(err),
            },
            Err(err) => GatewayInput::Failed(TransportError::from_io(err)),
        }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let write = async {
            stream.write_all(frame).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TransportError::from_io(err)),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}
