//! Turbo Push Core 公共库
//!
//! 提供推送系统各服务共用的能力：
//! - 统一的配置加载（应用注册表、队列、网关、推送参数）
//! - 通知任务 / Payload 领域模型
//! - 任务队列（beanstalkd）客户端抽象与内存实现
//! - 错误分类、日志初始化与 Prometheus 指标

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod tracing;

pub use config::{
    ApiConfig, AppCredentialConfig, BeanstalkConfig, ConfigManager, GatewayConfig, LoggingConfig,
    PriorityConfig, PushTuningConfig, ReplayMode, TurboAppConfig, app_config, load_config,
    load_config_from_path,
};
pub use error::{FailureClass, RetryableError};
pub use model::{Alert, NotificationJob, Payload, PayloadAlert, Priority};
