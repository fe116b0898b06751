use anyhow::Result;
use turbo_push_core::load_config;
use turbo_push_core::tracing::init_tracing_from_config;
use turbo_push_proxy::ApplicationBootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let app_config = load_config(Some("config"));
    init_tracing_from_config(Some(&app_config.logging));

    ApplicationBootstrap::run(app_config).await
}
