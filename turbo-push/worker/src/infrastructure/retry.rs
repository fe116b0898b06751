//! 网关重连退避策略

use std::time::Duration;

use turbo_push_core::{FailureClass, PushTuningConfig};

/// 按失败分类选择固定退避时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// 普通连接失败
    pub reconnect: Duration,
    /// 证书失效
    pub invalid_credentials: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            reconnect: Duration::from_secs(2),
            invalid_credentials: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(tuning: &PushTuningConfig) -> Self {
        Self {
            reconnect: Duration::from_secs(tuning.reconnect_backoff_secs),
            invalid_credentials: Duration::from_secs(tuning.invalid_credentials_backoff_secs),
        }
    }

    pub fn delay_for(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::Auth => self.invalid_credentials,
            _ => self.reconnect,
        }
    }
}
