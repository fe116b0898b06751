#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, DuplexStream, duplex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use turbo_push_core::model::{NotificationJob, Payload};
use turbo_push_worker::infrastructure::apns::{GatewayConnector, GatewayStream, TransportError};

pub const APP: &str = "demo";
pub const TUBE: &str = "push.demo";

/// 内存网关：每次连接产生一条 duplex 管道，服务端通过 channel 交给测试
pub struct DuplexGateway {
    servers: mpsc::UnboundedSender<DuplexStream>,
    attempts: Mutex<Vec<Instant>>,
    reject: AtomicBool,
    refuse: AtomicBool,
    buffer: usize,
}

impl DuplexGateway {
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            servers: tx,
            attempts: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
            buffer,
        });
        (gateway, rx)
    }

    /// 每次握手都以证书错误失败
    pub fn rejecting() -> Arc<Self> {
        let (gateway, _) = Self::new(1024);
        gateway.reject.store(true, Ordering::SeqCst);
        gateway
    }

    /// 网关不可达：每次连接都被拒绝
    pub fn refusing() -> Arc<Self> {
        let (gateway, _) = Self::new(1024);
        gateway.set_refusing(true);
        gateway
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refuse.store(refusing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayConnector for DuplexGateway {
    async fn connect(&self) -> Result<Box<dyn GatewayStream>, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.reject.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidCredentials(
                "certificate rejected".to_string(),
            ));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
        }
        let (client, server) = duplex(self.buffer);
        // 测试已不关心新连接时服务端直接丢弃
        let _ = self.servers.send(server);
        Ok(Box::new(client))
    }

    fn endpoint(&self) -> String {
        "duplex".to_string()
    }
}

/// 网关收到的一条通知帧
#[derive(Debug)]
pub struct SentFrame {
    pub identifier: u32,
    pub expiry: u32,
    pub token: Vec<u8>,
    pub payload: serde_json::Value,
}

pub async fn read_frame(stream: &mut DuplexStream) -> SentFrame {
    let mut header = [0u8; 45];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[0], 1, "command byte");
    let identifier = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    let expiry = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
    assert_eq!(u16::from_be_bytes([header[9], header[10]]), 32);
    let token = header[11..43].to_vec();
    let length = u16::from_be_bytes([header[43], header[44]]) as usize;
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await.unwrap();
    SentFrame {
        identifier,
        expiry,
        token,
        payload: serde_json::from_slice(&payload).unwrap(),
    }
}

pub async fn read_frame_within(stream: &mut DuplexStream, limit: Duration) -> SentFrame {
    tokio::time::timeout(limit, read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
}

pub async fn next_server(
    servers: &mut mpsc::UnboundedReceiver<DuplexStream>,
) -> DuplexStream {
    tokio::time::timeout(Duration::from_secs(5), servers.recv())
        .await
        .expect("timed out waiting for a gateway connection")
        .expect("gateway connector dropped")
}

pub fn token(byte: u8) -> String {
    format!("{byte:02x}").repeat(32)
}

pub fn job(byte: u8, alert: &str) -> NotificationJob {
    NotificationJob::new(APP, token(byte), Payload::with_alert(alert).unwrap())
        .enqueued_at(Utc::now())
}

pub fn alert_of(frame: &SentFrame) -> &str {
    frame.payload["aps"]["alert"].as_str().unwrap()
}
