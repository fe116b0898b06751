//! HTTP 错误响应
//!
//! 所有错误都以 `{"code": ..., "message": ...}` 返回，`code` 取值稳定。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::errors::SubmissionError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    /// 请求体不是合法的推送数组
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        if err.is_client_error() {
            Self::new(StatusCode::BAD_REQUEST, err.code(), err.to_string())
        } else {
            // broker 细节只记日志
            tracing::error!(error = ?err, "push submission failed");
            Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                err.code(),
                "job queue unavailable",
            )
        }
    }
}
