use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorBody;
use crate::pipeline::QueryError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self.0.downcast_ref::<QueryError>() {
            Some(QueryError::InvalidRequest(_)) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Some(QueryError::Rewrite(_)) => (StatusCode::BAD_GATEWAY, "llm"),
            Some(QueryError::Embed(_)) => (StatusCode::BAD_GATEWAY, "vision"),
            Some(QueryError::Index(_)) => (StatusCode::BAD_GATEWAY, "search"),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            error!("请求处理失败: {:#}", self.0);
        }
        let body = ErrorBody { error: self.0.to_string(), kind: kind.to_string() };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
