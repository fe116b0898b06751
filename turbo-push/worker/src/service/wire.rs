//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建 broker 连接工厂、网关连接器与每个应用的控制器。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use turbo_push_core::TurboAppConfig;
use turbo_push_core::metrics::PushPipeMetrics;
use turbo_push_core::queue::{BeanstalkConnector, QueueConnector};

use crate::application::{AdaptiveWorkerController, AppRuntime, PipeSettings};
use crate::infrastructure::apns::{GatewayConnector, TlsGatewayConnector};
use crate::infrastructure::config::{AppPipeConfig, PushWorkerConfig};
use crate::interface::runtime::ConsumerSettings;

/// 应用上下文 - 包含所有已启动的控制器
pub struct ApplicationContext {
    pub config: Arc<PushWorkerConfig>,
    pub controllers: Vec<AdaptiveWorkerController>,
}

/// 构建应用上下文；每个应用的 primary 通道在此启动
pub async fn initialize(app_config: &TurboAppConfig) -> Result<ApplicationContext> {
    app_config
        .validate()
        .context("invalid push worker configuration")?;

    // 1. Worker 配置
    let config = Arc::new(PushWorkerConfig::from_app_config(app_config));
    if config.apps.is_empty() {
        anyhow::bail!("no apps configured for this worker");
    }

    // 2. 指标
    let metrics = PushPipeMetrics::new().context("failed to register push pipe metrics")?;

    // 3. broker 连接工厂
    let queue: Arc<dyn QueueConnector> = Arc::new(BeanstalkConnector::new(
        config.beanstalk_address(),
        config.broker_connect_timeout,
    ));
    info!(broker = %config.beanstalk_address(), "broker configured");

    // 4. 每个应用的网关连接器与控制器
    let gateway_config = Arc::clone(&config);
    let controllers = build_controllers(&config, queue, metrics, move |app| {
        Arc::new(
            TlsGatewayConnector::new(
                gateway_config.gateway_host.clone(),
                gateway_config.gateway_port,
                app.cert_file.clone(),
                app.key_file.clone(),
            )
            .with_ca_file(gateway_config.gateway_ca_file.clone())
            .with_connect_timeout(gateway_config.gateway_connect_timeout),
        ) as Arc<dyn GatewayConnector>
    });

    Ok(ApplicationContext {
        config,
        controllers,
    })
}

/// 为每个应用构建运行时并启动控制器
pub fn build_controllers<F>(
    config: &PushWorkerConfig,
    queue: Arc<dyn QueueConnector>,
    metrics: PushPipeMetrics,
    gateway_for: F,
) -> Vec<AdaptiveWorkerController>
where
    F: Fn(&AppPipeConfig) -> Arc<dyn GatewayConnector>,
{
    let pipe_settings = PipeSettings::from_tuning(&config.tuning, config.gateway_write_timeout);
    let consumer_settings = ConsumerSettings {
        reserve_timeout: config.reserve_timeout,
        reconnect_delay: config.broker_reconnect_delay,
    };

    config
        .apps
        .iter()
        .map(|app| {
            let gateway = gateway_for(app);
            info!(
                app = %app.name,
                tube = %app.tube,
                endpoint = %gateway.endpoint(),
                worker_count = app.worker_count,
                "starting app pipes"
            );
            let runtime = AppRuntime {
                app_name: app.name.clone(),
                tube: app.tube.clone(),
                gateway,
                queue: Arc::clone(&queue),
                pipe_settings: pipe_settings.clone(),
                consumer_settings,
                replay_mode: config.tuning.replay_mode,
                priorities: config.priorities,
                ttr: config.ttr,
                metrics: metrics.clone(),
            };
            AdaptiveWorkerController::start(runtime, app.worker_count, &config.tuning)
        })
        .collect()
}
