//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! - 根据 `TURBO_ENV` 选择环境
//! - 加载 `config/environments/{env}.toml` 并合并到基础配置树

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toml::Value;
use tracing::debug;

use super::merge_value;

/// 环境配置目录
const ENVIRONMENTS_DIR: &str = "config/environments";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 TURBO_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("TURBO_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 当前环境对应的覆盖文件路径
    pub fn environment_file(dir: &Path, environment: &str) -> PathBuf {
        dir.join(format!("{environment}.toml"))
    }

    /// 将当前环境的覆盖配置合并进配置树
    pub fn apply_environment_overlay(root: &mut Value) -> Result<()> {
        let env = Self::get_environment();
        Self::apply_overlay_from(root, Path::new(ENVIRONMENTS_DIR), &env)
    }

    /// 从指定目录合并某个环境的覆盖配置；文件不存在时不做任何修改
    pub fn apply_overlay_from(root: &mut Value, dir: &Path, environment: &str) -> Result<()> {
        let env_config_path = Self::environment_file(dir, environment);
        if !env_config_path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&env_config_path)
            .with_context(|| format!("无法读取环境配置文件: {}", env_config_path.display()))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("无效的环境配置格式: {}", env_config_path.display()))?;

        debug!(
            environment = %environment,
            path = %env_config_path.display(),
            "applying environment config overlay"
        );
        merge_value(root, overlay);
        Ok(())
    }
}
