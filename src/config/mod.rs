//! Turbo Push Core 配置模块
//!
//! 该模块提供推送系统的统一配置管理：
//! - 配置文件 / 配置目录加载（base.toml + shared/services/overrides 片段合并）
//! - 环境特定配置覆盖（`config/environments/{TURBO_ENV}.toml`）
//! - 应用注册表、队列、网关、推送调优参数等配置定义

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use thiserror::Error;
use toml::Value;
use tracing::warn;

use crate::model::Priority;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<TurboAppConfig> = OnceLock::new();

/// 生产环境网关地址
pub const PRODUCTION_GATEWAY_HOST: &str = "gateway.push.apple.com";
/// 沙箱环境网关地址
pub const SANDBOX_GATEWAY_HOST: &str = "gateway.sandbox.push.apple.com";

/// 配置校验错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("app `{app}`: {reason}")]
    InvalidApp { app: String, reason: String },
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
    /// 输出 JSON 格式日志
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// beanstalkd 任务队列配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeanstalkConfig {
    pub host: String,
    pub port: u16,
    /// 应用 tube 命名模板，`{app}` 会被替换为应用名
    pub push_tube: String,
    /// 批量任务 tube
    pub batch_tube: String,
    /// reserve 超时（秒）
    pub reserve_timeout_secs: u64,
    /// 连接断开后的重连间隔（秒）
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
    /// 任务 TTR（秒）
    pub ttr_secs: u32,
    /// 批量展开 worker 数量
    pub batch_worker_count: usize,
}

impl Default for BeanstalkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11300,
            push_tube: "push.{app}".to_string(),
            batch_tube: "batch_push".to_string(),
            reserve_timeout_secs: 2,
            reconnect_delay_secs: 2,
            connect_timeout_secs: 5,
            ttr_secs: 120,
            batch_worker_count: 1,
        }
    }
}

impl BeanstalkConfig {
    /// 应用对应的 tube 名
    pub fn app_tube(&self, app_name: &str) -> String {
        self.push_tube.replace("{app}", app_name)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 推送网关配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 显式指定网关地址；为空时按 sandbox 选择
    pub host: Option<String>,
    pub sandbox: bool,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// 额外信任的 CA 证书（PEM）
    pub ca_file: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: None,
            sandbox: false,
            port: 2195,
            connect_timeout_secs: 10,
            write_timeout_secs: 10,
            ca_file: None,
        }
    }
}

impl GatewayConfig {
    pub fn endpoint_host(&self) -> &str {
        match self.host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ if self.sandbox => SANDBOX_GATEWAY_HOST,
            _ => PRODUCTION_GATEWAY_HOST,
        }
    }
}

/// 重放模式：被网关丢弃的通知重新提交到哪里
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// 重新进入本管道的发送队列（排在新任务前面）
    #[default]
    Outbound,
    /// 重新放回 broker 的应用 tube
    Broker,
}

/// 推送管道调优参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushTuningConfig {
    /// 发送队列容量
    pub outbound_capacity: usize,
    /// 重放缓冲容量
    pub replay_capacity: usize,
    /// socket 等待超时（秒）
    pub wait_timeout_secs: u64,
    /// 普通连接失败后的退避（秒）
    pub reconnect_backoff_secs: u64,
    /// 证书失效后的退避（秒）
    pub invalid_credentials_backoff_secs: u64,
    /// 任务过期阈值（秒）
    pub stale_after_secs: u64,
    /// 积压阈值，超过后启动 helper
    pub backlog_threshold: u64,
    /// helper 空闲超时（秒）
    pub idle_timeout_secs: u64,
    /// 扩缩容检查间隔（秒）
    pub scale_check_interval_secs: u64,
    /// 停止时最长排空时间（秒）
    pub drain_timeout_secs: u64,
    pub replay_mode: ReplayMode,
    /// worker 指标监听地址，为空时不启动
    pub metrics_address: Option<String>,
}

impl Default for PushTuningConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 1000,
            replay_capacity: 1000,
            wait_timeout_secs: 10,
            reconnect_backoff_secs: 2,
            invalid_credentials_backoff_secs: 3600,
            stale_after_secs: 3 * 3600,
            backlog_threshold: 100,
            idle_timeout_secs: 10,
            scale_check_interval_secs: 2,
            drain_timeout_secs: 300,
            replay_mode: ReplayMode::Outbound,
            metrics_address: None,
        }
    }
}

/// 优先级名称到 beanstalkd 数值优先级的映射（数值越小越优先）
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub low: u32,
    pub normal: u32,
    pub high: u32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            low: u32::MAX,
            normal: i32::MAX as u32,
            high: 0,
        }
    }
}

impl PriorityConfig {
    pub fn value_of(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
        }
    }
}

/// HTTP 提交接口配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub address: String,
    pub port: u16,
    /// 展开后任务数达到该值时整批写入批量 tube
    pub fanout_threshold: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 5000,
            fanout_threshold: 5,
        }
    }
}

/// 单个应用的证书与并发配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppCredentialConfig {
    /// 客户端证书（PEM）
    pub cert_file: String,
    /// 客户端私钥（PEM）
    pub key_file: String,
    /// 管道总数（1 个 primary + worker_count-1 个 helper）
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_worker_count() -> usize {
    4
}

/// Turbo Push 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurboAppConfig {
    pub logging: LoggingConfig,
    pub beanstalk: BeanstalkConfig,
    pub gateway: GatewayConfig,
    pub push: PushTuningConfig,
    pub priorities: PriorityConfig,
    pub api: ApiConfig,
    /// 应用注册表：app_name → 证书 / worker 数
    pub apps: BTreeMap<String, AppCredentialConfig>,
}

impl TurboAppConfig {
    /// 获取应用配置
    pub fn app(&self, name: &str) -> Option<&AppCredentialConfig> {
        self.apps.get(name)
    }

    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.beanstalk.push_tube.contains("{app}") {
            return Err(ConfigError::InvalidValue {
                field: "beanstalk.push_tube",
                reason: "must contain the `{app}` placeholder".to_string(),
            });
        }
        if self.push.outbound_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "push.outbound_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.push.replay_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "push.replay_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        for (name, app) in &self.apps {
            if app.worker_count == 0 {
                return Err(ConfigError::InvalidApp {
                    app: name.clone(),
                    reason: "worker_count must be at least 1".to_string(),
                });
            }
            if app.cert_file.is_empty() || app.key_file.is_empty() {
                return Err(ConfigError::InvalidApp {
                    app: name.clone(),
                    reason: "cert_file and key_file are required".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static TurboAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| load_with_fallback(&candidates))
}

/// 获取已加载的应用配置，未加载时返回默认配置
pub fn app_config() -> &'static TurboAppConfig {
    APP_CONFIG.get_or_init(TurboAppConfig::default)
}

/// 从指定路径加载配置（不写入全局实例，也不叠加环境覆盖）
pub fn load_config_from_path(path: &Path) -> Result<TurboAppConfig> {
    let value = load_config_value(path)?;
    value
        .try_into()
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> TurboAppConfig {
    for path in candidates {
        match load_with_environment(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    TurboAppConfig::default()
}

fn load_with_environment(path: &Path) -> Result<TurboAppConfig> {
    let mut value = load_config_value(path)?;
    if let Err(e) = ConfigManager::apply_environment_overlay(&mut value) {
        warn!("failed to load environment config: {e:#}");
    }
    value
        .try_into()
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// 从文件或目录读取未类型化的配置树
fn load_config_value(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_directory(path)
    } else {
        load_toml_value(path)
    }
}

/// 从目录加载配置
fn load_config_directory(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    Ok(merged)
}

/// 合并目录中的配置片段（按文件名排序）
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in {}", path.display()))?;
    Ok(value)
}

/// 递归合并：表按键合并，其余值整体覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = TurboAppConfig::default();
        assert_eq!(cfg.beanstalk.port, 11300);
        assert_eq!(cfg.beanstalk.app_tube("demo"), "push.demo");
        assert_eq!(cfg.beanstalk.batch_tube, "batch_push");
        assert_eq!(cfg.push.outbound_capacity, 1000);
        assert_eq!(cfg.push.stale_after_secs, 10800);
        assert_eq!(cfg.api.fanout_threshold, 5);
        assert_eq!(cfg.gateway.endpoint_host(), PRODUCTION_GATEWAY_HOST);
        assert!(cfg.apps.is_empty());
    }

    #[test]
    fn test_priority_values() {
        let priorities = PriorityConfig::default();
        assert_eq!(priorities.value_of(Priority::Low), 4294967295);
        assert_eq!(priorities.value_of(Priority::Normal), 2147483647);
        assert_eq!(priorities.value_of(Priority::High), 0);
    }

    #[test]
    fn test_load_single_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[gateway]
sandbox = true

[push]
replay_mode = "broker"
backlog_threshold = 50

[apps.demo]
cert_file = "certs/demo.pem"
key_file = "certs/demo.key"
"#
        )
        .unwrap();

        let cfg = load_config_from_path(file.path()).unwrap();
        assert_eq!(cfg.gateway.endpoint_host(), SANDBOX_GATEWAY_HOST);
        assert_eq!(cfg.push.replay_mode, ReplayMode::Broker);
        assert_eq!(cfg.push.backlog_threshold, 50);
        assert_eq!(cfg.push.idle_timeout_secs, 10);
        let demo = cfg.app("demo").unwrap();
        assert_eq!(demo.worker_count, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_directory_merges_fragments() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.toml"),
            "[beanstalk]\nhost = \"10.0.0.1\"\n\n[apps.demo]\ncert_file = \"a.pem\"\nkey_file = \"a.key\"\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("overrides")).unwrap();
        fs::write(
            dir.path().join("overrides").join("local.toml"),
            "[beanstalk]\nport = 11301\n\n[apps.demo]\nworker_count = 2\n",
        )
        .unwrap();

        let cfg = load_config_from_path(dir.path()).unwrap();
        assert_eq!(cfg.beanstalk.address(), "10.0.0.1:11301");
        let demo = cfg.app("demo").unwrap();
        assert_eq!(demo.cert_file, "a.pem");
        assert_eq!(demo.worker_count, 2);
    }

    #[test]
    fn test_directory_without_base_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from_path(dir.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = TurboAppConfig::default();
        cfg.apps.insert(
            "demo".to_string(),
            AppCredentialConfig {
                cert_file: "a.pem".to_string(),
                key_file: "a.key".to_string(),
                worker_count: 0,
            },
        );
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidApp { .. })
        ));

        let mut cfg = TurboAppConfig::default();
        cfg.beanstalk.push_tube = "push".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "beanstalk.push_tube", .. })
        ));
    }

    #[test]
    fn test_merge_value_overrides_scalars() {
        let mut base: Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2\n").unwrap();
        let overlay: Value = toml::from_str("[t]\ny = 3\nz = 4\n").unwrap();
        merge_value(&mut base, overlay);
        let t = base.get("t").unwrap();
        assert_eq!(t.get("x").and_then(Value::as_integer), Some(1));
        assert_eq!(t.get("y").and_then(Value::as_integer), Some(3));
        assert_eq!(t.get("z").and_then(Value::as_integer), Some(4));
    }
}
