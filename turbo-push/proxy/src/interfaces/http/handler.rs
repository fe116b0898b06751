//! HTTP 处理函数

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use turbo_push_core::metrics::{PushApiMetrics, gather_metrics};

use super::error::ApiError;
use crate::application::commands::{QueryTubeStatsCommand, SubmitPushCommand};
use crate::application::handlers::PushCommandHandler;
use crate::domain::model::PushRequestItem;

/// 处理函数共享的状态
#[derive(Clone)]
pub struct AppState {
    pub command_handler: Arc<PushCommandHandler>,
    pub metrics: PushApiMetrics,
}

impl AppState {
    fn reject(&self, err: ApiError) -> ApiError {
        self.metrics
            .requests_rejected_total
            .with_label_values(&[err.code()])
            .inc();
        err
    }
}

/// `POST /push`
pub async fn push(
    State(state): State<AppState>,
    body: Result<Json<Vec<PushRequestItem>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(items) = body.map_err(|rejection| {
        debug!(error = %rejection, "rejecting malformed push request");
        state.reject(ApiError::invalid_request(rejection.body_text()))
    })?;

    state
        .command_handler
        .handle_submit(SubmitPushCommand { items })
        .await
        .map_err(|err| state.reject(err.into()))?;

    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub app_name: Option<String>,
}

/// `GET /push_stats`：指定应用时返回该 tube 的统计，否则按 tube 名返回全部
pub async fn push_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    let single = query.app_name.is_some();
    let stats = state
        .command_handler
        .handle_query_stats(QueryTubeStatsCommand {
            app_name: query.app_name,
        })
        .await
        .map_err(|err| state.reject(err.into()))?;

    let body = if single {
        json!(stats.first())
    } else {
        let by_tube: BTreeMap<&str, _> = stats
            .iter()
            .map(|stats| (stats.name.as_str(), stats))
            .collect();
        json!(by_tube)
    };
    Ok(Json(body))
}

/// `GET /metrics`
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
