use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use super::handler::{self, AppState};

/// 提交接口路由；同一组路由同时挂在根路径和 `/api` 下
pub fn build_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/push", post(handler::push))
        .route("/push_stats", get(handler::push_stats))
        .route("/metrics", get(handler::metrics));

    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        tracing::info_span!(
            "http.request",
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(trace_layer)
        .with_state(state)
}
