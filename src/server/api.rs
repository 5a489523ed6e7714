use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use log::{debug, info, warn};

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::pipeline::QueryRequest;
use crate::types::{ImageRecord, RecordId, ResponseRecord, SearchResult};

/// 取出需要转发给存储服务的 Authorization 头
fn forwarded_authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// 计算一批图片的向量，格式与搜索服务的自定义技能一致
#[utoipa::path(
    post,
    path = "/vectorize",
    request_body = VectorizeRequest,
    responses(
        (status = 200, body = VectorizeResponse),
    )
)]
pub async fn vectorize_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<VectorizeRequest>,
) -> Result<Json<VectorizeResponse>> {
    let records: Vec<ImageRecord> = request.values.into_iter().map(Into::into).collect();
    info!("收到 {} 条索引请求", records.len());
    let values = state.ingest.run(records, forwarded_authorization(&headers)).await;
    Ok(Json(VectorizeResponse { values }))
}

/// 索引单张图片
#[utoipa::path(
    get,
    path = "/index",
    params(IndexParams),
    responses(
        (status = 200, body = ResponseRecord),
    )
)]
pub async fn index_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<IndexParams>,
) -> Result<Json<ResponseRecord>> {
    let record_id = params.id.unwrap_or_else(|| params.url.clone());
    let record = ImageRecord::new(record_id, params.url);
    let mut values = state.ingest.run(vec![record], forwarded_authorization(&headers)).await;
    let response = values.pop().ok_or_else(|| anyhow::anyhow!("索引结果为空"))?;
    Ok(Json(response))
}

/// 接收 Event Grid 推送的事件，新上传的图片会被自动索引
///
/// 单个事件解析失败只影响对应的记录；同一批次中含有订阅验证事件时，
/// 其余事件照常处理，响应体为验证结果
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(events): Json<Vec<GridEvent>>,
) -> Result<Response> {
    let mut validation = None;
    // 解析失败的事件直接占位，保持与输入顺序一致
    let mut slots = vec![];
    for event in events {
        match event.event_type.as_str() {
            SUBSCRIPTION_VALIDATION_EVENT => {
                let data: SubscriptionValidationData = serde_json::from_value(event.data)?;
                info!("收到 Event Grid 订阅验证");
                validation = Some(data.validation_code);
            }
            BLOB_CREATED_EVENT => match serde_json::from_value::<BlobCreatedData>(event.data) {
                Ok(data) => {
                    let record_id = RecordId::from(data.client_request_id.unwrap_or(event.id));
                    slots.push(Ok(ImageRecord::new(record_id, data.url)));
                }
                Err(err) => {
                    warn!("无法解析事件 {}: {}", event.id, err);
                    let message = format!("无效的事件数据: {err}");
                    slots.push(Err(ResponseRecord::failure(RecordId::from(event.id), message)));
                }
            },
            other => debug!("忽略事件 {}", other),
        }
    }

    let records = slots.iter().filter_map(|slot| slot.as_ref().ok().cloned()).collect();
    let mut processed = state.ingest.run(records, forwarded_authorization(&headers)).await.into_iter();
    let values = slots
        .into_iter()
        .filter_map(|slot| match slot {
            Ok(_) => processed.next(),
            Err(failure) => Some(failure),
        })
        .collect::<Vec<_>>();

    let failed = values.iter().filter(|record| !record.is_success()).count();
    if failed > 0 {
        warn!("{} 个事件处理失败", failed);
    }

    match validation {
        Some(code) => Ok(Json(ValidationResponse { validation_response: code }).into_response()),
        None => Ok(Json(VectorizeResponse { values }).into_response()),
    }
}

/// 使用自然语言搜索图片
#[utoipa::path(
    post,
    path = "/search",
    request_body = QueryRequest,
    responses(
        (status = 200, body = Vec<SearchResult>),
        (status = 400, body = ErrorBody),
        (status = 502, body = ErrorBody),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Vec<SearchResult>>> {
    let results = state.query.handle(request, forwarded_authorization(&headers)).await?;
    Ok(Json(results))
}
