use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::types::{ImageRecord, RecordId, ResponseRecord};

/// 索引请求，即搜索服务自定义技能的输入格式
#[derive(Debug, Deserialize, ToSchema)]
pub struct VectorizeRequest {
    pub values: Vec<SkillRecord>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkillRecord {
    pub record_id: RecordId,
    pub data: SkillData,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkillData {
    /// 图片的 blob 地址
    #[serde(default)]
    pub image_url: String,
}

impl From<SkillRecord> for ImageRecord {
    fn from(record: SkillRecord) -> Self {
        ImageRecord::new(record.record_id, record.data.image_url)
    }
}

/// 索引响应，每条输入对应一条结果
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VectorizeResponse {
    pub values: Vec<ResponseRecord>,
}

/// 通过查询参数索引单张图片
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IndexParams {
    /// 图片的 blob 地址
    pub url: String,
    /// 记录 ID，默认使用图片地址
    pub id: Option<String>,
}

/// Event Grid 推送的事件，同时兼容 CloudEvents 的 `type` 字段
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridEvent {
    pub id: String,
    #[serde(alias = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";
pub const BLOB_CREATED_EVENT: &str = "Microsoft.Storage.BlobCreated";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionValidationData {
    pub validation_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobCreatedData {
    pub url: String,
    #[serde(default)]
    pub client_request_id: Option<String>,
}

/// 订阅验证的响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_response: String,
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// 错误描述
    pub error: String,
    /// 错误类别：invalid_request / llm / vision / search / internal
    pub kind: String,
}
