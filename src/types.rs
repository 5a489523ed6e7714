use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 嵌入向量，维数由视觉服务决定
pub type EmbeddingVector = Vec<f64>;

/// 记录 ID，调用方既可能传数字也可能传字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

/// 待索引的图片
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub record_id: RecordId,
    /// 不带任何签名参数的 blob 地址
    pub image_url: String,
}

impl ImageRecord {
    pub fn new(record_id: impl Into<RecordId>, image_url: impl Into<String>) -> Self {
        Self { record_id: record_id.into(), image_url: image_url.into() }
    }
}

/// 写入搜索索引的文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    /// 文档主键，同一主键重复写入会覆盖旧文档
    pub id: String,
    pub image_url: String,
    pub image_vector: EmbeddingVector,
    pub title: String,
}

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchResult {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Image URL")]
    pub image_url: String,
    #[serde(rename = "Score")]
    pub score: f64,
    /// base64 编码的图片内容，下载失败时为错误描述
    #[serde(rename = "Image", skip_serializing_if = "Option::is_none", default)]
    pub image: Option<String>,
}

/// 成功处理后返回给调用方的数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordData {
    pub image_vector: EmbeddingVector,
    pub image_url: String,
}

/// 每条输入对应一条响应，失败时 `data` 为空、`errors` 为错误描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub record_id: RecordId,
    pub data: Option<RecordData>,
    pub errors: Option<String>,
    pub warnings: Option<String>,
}

impl ResponseRecord {
    pub fn success(record_id: RecordId, data: RecordData) -> Self {
        Self { record_id, data: Some(data), errors: None, warnings: None }
    }

    pub fn failure(record_id: RecordId, error: impl fmt::Display) -> Self {
        Self { record_id, data: None, errors: Some(error.to_string()), warnings: None }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }
}
