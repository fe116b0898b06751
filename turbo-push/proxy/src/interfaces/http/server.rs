use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// 在 `address` 上提供 HTTP 服务，直到停止信号发出
pub async fn serve(address: &str, router: Router, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind push api on {address}"))?;
    info!(address, "push api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await
        .context("push api server failed")
}
