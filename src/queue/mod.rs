//! 任务队列抽象
//!
//! 推送系统以 beanstalkd 作为生产者（HTTP 提交接口）与消费者（推送 worker）之间的
//! 持久缓冲。[`JobQueue`] 描述单条 broker 连接上的操作，[`QueueConnector`] 负责建立连接。
//! 生产环境使用 [`BeanstalkConnector`]，测试使用 [`MemoryBroker`]。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

use crate::error::{FailureClass, RetryableError};

pub mod beanstalk;
pub mod memory;

pub use beanstalk::{BeanstalkConnection, BeanstalkConnector};
pub use memory::{MemoryBroker, StoredJob, StoredJobState};

/// 队列操作错误
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("broker connection closed")]
    Closed,
    #[error("broker operation timed out")]
    Timeout,
    #[error("job {0} not found")]
    NotFound(u64),
    #[error("job {0} was buried by the broker")]
    Buried(u64),
    #[error("broker error: {0}")]
    Server(String),
    #[error("unexpected broker response: {0}")]
    Protocol(String),
}

impl RetryableError for QueueError {
    fn failure_class(&self) -> FailureClass {
        match self {
            QueueError::NotFound(_) | QueueError::Buried(_) => FailureClass::Permanent,
            _ => FailureClass::BrokerUnavailable,
        }
    }
}

/// 已 reserve 的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub id: u64,
    pub body: Vec<u8>,
}

/// put 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// 数值越小越优先
    pub priority: u32,
    pub delay: Duration,
    /// time-to-run
    pub ttr: Duration,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            priority: u32::MAX,
            delay: Duration::ZERO,
            ttr: Duration::from_secs(120),
        }
    }
}

/// tube 统计信息（`stats-tube` 的结果）
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TubeStats {
    pub name: String,
    pub current_jobs_urgent: u64,
    pub current_jobs_ready: u64,
    pub current_jobs_reserved: u64,
    pub current_jobs_delayed: u64,
    pub current_jobs_buried: u64,
    pub total_jobs: u64,
    /// 其余未建模的字段原样透传
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl TubeStats {
    /// 解析 beanstalkd 返回的 YAML 字典（`key: value` 每行一项）
    pub fn parse(text: &str) -> Result<Self, QueueError> {
        let mut stats = TubeStats::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line == "---" {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(QueueError::Protocol(format!("bad stats line: {line}")));
            };
            let key = key.trim();
            let value = value.trim();
            let number = value.parse::<u64>().ok();
            match (key, number) {
                ("name", _) => stats.name = value.trim_matches('"').to_string(),
                ("current-jobs-urgent", Some(n)) => stats.current_jobs_urgent = n,
                ("current-jobs-ready", Some(n)) => stats.current_jobs_ready = n,
                ("current-jobs-reserved", Some(n)) => stats.current_jobs_reserved = n,
                ("current-jobs-delayed", Some(n)) => stats.current_jobs_delayed = n,
                ("current-jobs-buried", Some(n)) => stats.current_jobs_buried = n,
                ("total-jobs", Some(n)) => stats.total_jobs = n,
                (_, Some(n)) => {
                    stats.other.insert(key.to_string(), serde_json::Value::from(n));
                }
                (_, None) => {
                    stats
                        .other
                        .insert(key.to_string(), serde_json::Value::from(value));
                }
            }
        }
        Ok(stats)
    }
}

/// 单条 broker 连接
#[async_trait]
pub trait JobQueue: Send {
    /// 后续 put 写入的 tube
    async fn use_tube(&mut self, tube: &str) -> Result<(), QueueError>;

    /// 只 watch 给定 tube（忽略其余 tube）
    async fn watch_only(&mut self, tube: &str) -> Result<(), QueueError>;

    async fn put(&mut self, body: &[u8], options: PutOptions) -> Result<u64, QueueError>;

    /// 等待最多 `timeout`；超时返回 `Ok(None)`
    async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError>;

    /// 确认完成（delete）
    async fn ack(&mut self, id: u64) -> Result<(), QueueError>;

    /// 放回队列，稍后重试
    async fn release(&mut self, id: u64, priority: u32, delay: Duration)
    -> Result<(), QueueError>;

    /// 永久搁置
    async fn bury(&mut self, id: u64, priority: u32) -> Result<(), QueueError>;

    async fn stats_tube(&mut self, tube: &str) -> Result<TubeStats, QueueError>;
}

/// broker 连接工厂
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn JobQueue>, QueueError>;
}

/// 以固定间隔重试连接，直到成功或收到停止信号（返回 `None`）
pub async fn connect_with_retry(
    connector: &dyn QueueConnector,
    retry_delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Box<dyn JobQueue>> {
    loop {
        if *shutdown.borrow() {
            return None;
        }
        match connector.connect().await {
            Ok(conn) => return Some(conn),
            Err(err) => {
                warn!(
                    error = %err,
                    retry_in_secs = retry_delay.as_secs(),
                    "failed to connect to broker"
                );
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
}
