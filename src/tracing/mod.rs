//! # 日志初始化模块
//!
//! 为各个服务进程提供统一的 tracing subscriber 初始化。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// 优先使用环境变量 `RUST_LOG`，未设置时使用配置中的日志级别。
///
/// # 示例
/// ```rust,ignore
/// use turbo_push_core::config::LoggingConfig;
///
/// init_tracing_from_config(None);
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     with_file: true,
///     with_line_number: true,
///     ..Default::default()
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    if let Err(err) = try_init_tracing(logging_config) {
        eprintln!("failed to initialise tracing subscriber: {err}");
    }
}

/// 初始化日志系统，已初始化时返回错误（测试中可重复调用）
pub fn try_init_tracing(
    logging_config: Option<&LoggingConfig>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter = build_env_filter(config);

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info")),
    }
}
