//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建：broker 连接工厂 -> 发布器 / 校验器 -> 领域服务 -> 命令处理器 -> HTTP 路由，
//! 以及批量 tube 消费者。

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;
use turbo_push_core::TurboAppConfig;
use turbo_push_core::metrics::PushApiMetrics;
use turbo_push_core::queue::{BeanstalkConnector, QueueConnector};

use crate::application::handlers::PushCommandHandler;
use crate::domain::service::PushDomainService;
use crate::infrastructure::config::PushProxyConfig;
use crate::infrastructure::messaging::QueueJobPublisher;
use crate::infrastructure::validator::RequestValidatorImpl;
use crate::interfaces::http::{AppState, build_router};
use crate::interfaces::runtime::{BatchConsumerSettings, BatchPushConsumer};

/// 应用上下文 - 包含 HTTP 路由与批量消费者
pub struct ApplicationContext {
    pub config: Arc<PushProxyConfig>,
    pub router: Router,
    pub batch_consumers: Vec<BatchPushConsumer>,
}

/// 构建应用上下文
pub async fn initialize(app_config: &TurboAppConfig) -> Result<ApplicationContext> {
    app_config
        .validate()
        .context("invalid push proxy configuration")?;

    // 1. Proxy 配置
    let config = Arc::new(PushProxyConfig::from_app_config(app_config));
    if config.apps.is_empty() {
        tracing::warn!("no apps registered, every push request will be rejected");
    }

    // 2. 指标
    let metrics = PushApiMetrics::new().context("failed to register push api metrics")?;

    // 3. broker 连接工厂
    let queue: Arc<dyn QueueConnector> = Arc::new(BeanstalkConnector::new(
        config.beanstalk_address(),
        config.broker_connect_timeout,
    ));
    info!(broker = %config.beanstalk_address(), "broker configured");

    Ok(build(config, queue, metrics))
}

/// 在给定的 broker 之上装配全部组件
pub fn build(
    config: Arc<PushProxyConfig>,
    queue: Arc<dyn QueueConnector>,
    metrics: PushApiMetrics,
) -> ApplicationContext {
    let directory = Arc::new(config.tube_directory());

    let publisher = Arc::new(QueueJobPublisher::new(
        Arc::clone(&queue),
        Arc::clone(&directory),
        config.priorities,
        config.ttr,
    ));
    let validator = Arc::new(RequestValidatorImpl::new(Arc::clone(&directory)));
    let domain_service = Arc::new(PushDomainService::new(
        publisher,
        validator,
        Arc::clone(&directory),
        config.fanout_threshold,
        metrics.clone(),
    ));
    let command_handler = Arc::new(PushCommandHandler::new(domain_service));

    let router = build_router(AppState {
        command_handler,
        metrics: metrics.clone(),
    });

    let settings = BatchConsumerSettings {
        reserve_timeout: config.reserve_timeout,
        reconnect_delay: config.broker_reconnect_delay,
        ttr: config.ttr,
    };
    let batch_consumers = (0..config.batch_worker_count)
        .map(|_| {
            BatchPushConsumer::new(
                Arc::clone(&queue),
                Arc::clone(&directory),
                config.priorities,
                settings,
                metrics.clone(),
            )
        })
        .collect();

    ApplicationContext {
        config,
        router,
        batch_consumers,
    }
}
