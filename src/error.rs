//! Turbo Push Core 错误分类模块
//!
//! 推送链路中的每一种失败最终都要归入一个 [`FailureClass`]，由它决定处理策略：
//! 退避重试、重连，或者永久丢弃并确认。各层的具体错误类型（编解码、网关传输、
//! 任务队列）通过实现 [`RetryableError`] 声明自己的归类。

use std::fmt;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// 网络 / I/O 失败、非证书原因的 TLS 失败：短退避后重连
    Transient,
    /// 证书或私钥无效 / 过期：进入 Invalid，长退避
    Auth,
    /// 错误帧格式异常：重连
    Protocol,
    /// Payload 过大 / 设备 token 非法：永久失败，不重试
    Permanent,
    /// 网关明确拒绝某条通知：丢弃该条，重放其后的通知，强制重连
    GatewayRejection,
    /// 队列任务体无法解析：bury
    JobParse,
    /// 与队列的连接丢失：固定退避后重连
    BrokerUnavailable,
}

impl FailureClass {
    /// 用作指标 / 日志标签的名字
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Auth => "auth",
            FailureClass::Protocol => "protocol",
            FailureClass::Permanent => "permanent",
            FailureClass::GatewayRejection => "gateway_rejection",
            FailureClass::JobParse => "job_parse",
            FailureClass::BrokerUnavailable => "broker_unavailable",
        }
    }

    /// 重新尝试是否有机会成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureClass::Transient | FailureClass::Protocol | FailureClass::BrokerUnavailable
        )
    }

    /// 对应的任务是否应当被永久丢弃（bury / 不重放）
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailureClass::Permanent | FailureClass::GatewayRejection | FailureClass::JobParse
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 判断错误是否可重试
pub trait RetryableError {
    fn failure_class(&self) -> FailureClass;

    fn is_retryable(&self) -> bool {
        self.failure_class().is_retryable()
    }
}
