use thiserror::Error;
use turbo_push_core::model::{JobError, PayloadError};

/// 提交失败；除 [`SubmissionError::Publish`] 外整批请求都会被拒绝且不入队
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("unknown app name: {0}")]
    UnknownApp(String),
    #[error("request item {index} has no device token")]
    MissingDeviceToken { index: usize },
    #[error("request item {index}: {source}")]
    InvalidDeviceToken {
        index: usize,
        #[source]
        source: JobError,
    },
    #[error("request item {index}: {source}")]
    PayloadTooLarge {
        index: usize,
        #[source]
        source: PayloadError,
    },
    #[error("failed to enqueue push jobs")]
    Publish(#[source] anyhow::Error),
}

impl SubmissionError {
    /// 响应体中的错误码
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionError::UnknownApp(_) => "unknown_app_name",
            SubmissionError::MissingDeviceToken { .. } => "missing_device_token",
            SubmissionError::InvalidDeviceToken { .. } => "invalid_device_token",
            SubmissionError::PayloadTooLarge { .. } => "payload_too_large",
            SubmissionError::Publish(_) => "broker_unavailable",
        }
    }

    /// 是否为请求本身的问题
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SubmissionError::Publish(_))
    }
}
