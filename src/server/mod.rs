mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::error::AppError;
pub use self::state::*;
pub use self::types::{ErrorBody, VectorizeRequest, VectorizeResponse};

#[derive(OpenApi)]
#[openapi(
    paths(api::vectorize_handler, api::index_handler, api::search_handler,),
    components(schemas(
        types::VectorizeRequest,
        types::VectorizeResponse,
        types::ErrorBody,
        crate::pipeline::QueryRequest,
        crate::types::SearchResult,
    ),)
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/vectorize", post(api::vectorize_handler))
        // 兼容旧的函数名
        .route("/GetImageEmbeddings", post(api::vectorize_handler))
        .route("/index", get(api::index_handler))
        .route("/events", post(api::events_handler))
        .route("/search", post(api::search_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
