#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use tower::ServiceExt;
use turbo_push_core::TurboAppConfig;
use turbo_push_core::config::AppCredentialConfig;
use turbo_push_core::metrics::PushApiMetrics;
use turbo_push_core::queue::MemoryBroker;
use turbo_push_proxy::infrastructure::config::PushProxyConfig;
use turbo_push_proxy::service::wire::{self, ApplicationContext};

pub const BATCH_TUBE: &str = "batch_push";

/// 第 `n` 个测试 token（64 位十六进制）
pub fn token(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

pub fn proxy_config() -> PushProxyConfig {
    let mut app = TurboAppConfig::default();
    for name in ["demo", "other"] {
        app.apps.insert(
            name.to_string(),
            AppCredentialConfig {
                cert_file: format!("certs/{name}.pem"),
                key_file: format!("certs/{name}.key"),
                worker_count: 1,
            },
        );
    }
    let mut config = PushProxyConfig::from_app_config(&app);
    config.reserve_timeout = Duration::from_millis(50);
    config.broker_reconnect_delay = Duration::from_millis(20);
    config
}

pub fn context(broker: &MemoryBroker) -> ApplicationContext {
    wire::build(
        Arc::new(proxy_config()),
        Arc::new(broker.clone()),
        PushApiMetrics::new().unwrap(),
    )
}

pub async fn post_json(router: Router, uri: &str, body: String) -> Response {
    router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get(router: Router, uri: &str) -> Response {
    router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// 轮询直到条件成立，最多等 5 秒
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
