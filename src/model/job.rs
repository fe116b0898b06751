//! 通知任务
//!
//! 队列中每个任务体是一个 JSON 对象；构造后不可变，由队列消费者持有直到交给推送管道。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payload::{Payload, PayloadError};
use super::priority::Priority;
use crate::error::{FailureClass, RetryableError};

/// 设备 token 的十六进制长度（32 字节）
pub const TOKEN_HEX_LENGTH: usize = 64;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("malformed job body: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid device token: {0}")]
    InvalidToken(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl RetryableError for JobError {
    fn failure_class(&self) -> FailureClass {
        match self {
            JobError::Parse(_) => FailureClass::JobParse,
            JobError::InvalidToken(_) | JobError::Payload(_) => FailureClass::Permanent,
        }
    }
}

/// 通知任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub app_name: String,
    /// 十六进制设备 token
    pub device_token: String,
    pub payload: Payload,
    #[serde(default)]
    pub priority: Priority,
    /// 投递延迟（秒）
    #[serde(default)]
    pub delay: u64,
    /// 提交时间，由提交接口写入；缺失的任务永远不会被判定为过期
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub enqueue_time: Option<DateTime<Utc>>,
    /// 网关侧过期时间（epoch 秒，0 表示不过期）
    #[serde(default)]
    pub expiry: u32,
}

impl NotificationJob {
    pub fn new(app_name: impl Into<String>, device_token: impl Into<String>, payload: Payload) -> Self {
        Self {
            app_name: app_name.into(),
            device_token: device_token.into(),
            payload,
            priority: Priority::default(),
            delay: 0,
            enqueue_time: None,
            expiry: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn enqueued_at(mut self, at: DateTime<Utc>) -> Self {
        self.enqueue_time = Some(at);
        self
    }

    /// 解析队列任务体
    pub fn from_slice(body: &[u8]) -> Result<Self, JobError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, JobError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 校验 token 与 payload 大小
    pub fn validate(&self) -> Result<(), JobError> {
        decode_device_token(&self.device_token)?;
        self.payload.check_size()?;
        Ok(())
    }

    /// 距提交时间的时长；时钟回拨时视为 0
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.enqueue_time
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ceiling: Duration) -> bool {
        self.age(now).is_some_and(|age| age > ceiling)
    }
}

/// 将 64 位十六进制 token 解码为 32 字节
pub fn decode_device_token(token_hex: &str) -> Result<[u8; 32], JobError> {
    if token_hex.len() != TOKEN_HEX_LENGTH {
        return Err(JobError::InvalidToken(format!(
            "expected {TOKEN_HEX_LENGTH} hex chars, got {}",
            token_hex.len()
        )));
    }
    let mut token = [0u8; 32];
    hex::decode_to_slice(token_hex, &mut token)
        .map_err(|e| JobError::InvalidToken(e.to_string()))?;
    Ok(token)
}
