//! 应用启动器 - 负责依赖注入和服务启动

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use turbo_push_core::TurboAppConfig;

use super::wire;
use crate::interfaces::http::serve;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点，收到 Ctrl+C 后停止接收请求并退出
    pub async fn run(config: &'static TurboAppConfig) -> Result<()> {
        let context = wire::initialize(config).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumers: Vec<_> = context
            .batch_consumers
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run(shutdown_rx.clone())))
            .collect();
        info!(batch_workers = consumers.len(), "batch consumers started");

        let address = context.config.listen_address.clone();
        let router = context.router;
        let mut server = tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { serve(&address, router, shutdown).await }
        });

        // 监听失败时不等待信号，直接退出
        let served = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
                (&mut server).await
            }
            result = &mut server => result,
        };
        let _ = shutdown_tx.send(true);
        let served = served.context("push api task failed")?;

        for result in futures::future::join_all(consumers).await {
            if let Err(err) = result {
                error!(error = %err, "batch consumer task failed");
            }
        }
        info!("turbo-push proxy stopped");
        served
    }
}
