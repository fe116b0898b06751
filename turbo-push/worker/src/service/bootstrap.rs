//! 应用启动器 - 负责依赖注入和服务启动

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use turbo_push_core::TurboAppConfig;

use super::wire::{self, ApplicationContext};
use crate::interface::http::serve_metrics;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点，收到 Ctrl+C 后排空并退出
    pub async fn run(config: &'static TurboAppConfig) -> Result<()> {
        let context = wire::initialize(config).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let running = Self::start(context, shutdown_rx);

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("shutdown signal received, draining pipes");
        let _ = shutdown_tx.send(true);

        running.await;
        info!("turbo-push worker stopped");
        Ok(())
    }

    /// 启动所有控制器与可选的指标监听，返回等待它们全部退出的 future
    pub fn start(
        context: ApplicationContext,
        shutdown: watch::Receiver<bool>,
    ) -> impl std::future::Future<Output = ()> {
        let metrics_task = context.config.metrics_address.clone().map(|address| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_metrics(&address, shutdown).await {
                    error!(error = %err, "metrics listener stopped");
                }
            })
        });

        let controllers: Vec<_> = context
            .controllers
            .into_iter()
            .map(|controller| tokio::spawn(controller.run(shutdown.clone())))
            .collect();

        async move {
            for result in futures::future::join_all(controllers).await {
                if let Err(err) = result {
                    error!(error = %err, "worker controller task failed");
                }
            }
            if let Some(task) = metrics_task {
                let _ = task.await;
            }
        }
    }
}
