//! 向量搜索索引的读写

use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::metrics;
use crate::types::{IndexDocument, SearchResult};

pub const DEFAULT_SEARCH_API_VERSION: &str = "2023-11-01";
/// 调用方未指定时返回的结果数量
pub const DEFAULT_K: usize = 5;
/// 存放图片向量的字段
pub const VECTOR_FIELD: &str = "imageVector";
/// 搜索时返回的字段
pub const SELECT_FIELDS: [&str; 2] = ["title", "imageUrl"];

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("请求搜索服务失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("搜索服务返回错误: HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("无法解析搜索服务响应: {0}")]
    Decode(String),
    #[error("文档 {key} 写入失败: {message}")]
    Rejected { key: String, message: String },
}

/// 索引只允许字母、数字、`_`、`-`、`=` 作为主键，因此使用图片地址的 URL-safe base64
pub fn document_key(image_url: &str) -> String {
    URL_SAFE.encode(image_url)
}

/// 单个文档的写入结果
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    pub key: String,
    pub status: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    pub status_code: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WriteResult {
    #[serde(rename = "value", default)]
    pub documents: Vec<DocumentStatus>,
}

impl WriteResult {
    /// 第一个写入失败的文档
    pub fn first_failure(&self) -> Option<IndexError> {
        self.documents.iter().find(|doc| !doc.status).map(|doc| IndexError::Rejected {
            key: doc.key.clone(),
            message: doc.error_message.clone().unwrap_or_else(|| format!("HTTP {}", doc.status_code)),
        })
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 整批写入，同一主键的文档会被覆盖
    async fn upsert(&self, documents: &[IndexDocument]) -> Result<WriteResult, IndexError>;

    /// 纯向量 k 近邻搜索，结果按索引给出的相似度排序，只返回 `title` 和 `imageUrl`
    async fn search(&self, vector: &[f64], k: usize) -> Result<Vec<SearchResult>, IndexError>;
}

#[derive(Serialize)]
struct UpsertAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    #[serde(flatten)]
    document: &'a IndexDocument,
}

#[derive(Deserialize)]
struct SearchResponse {
    value: Vec<ScoredDocument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoredDocument {
    #[serde(rename = "@search.score")]
    score: f64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl From<ScoredDocument> for SearchResult {
    fn from(doc: ScoredDocument) -> Self {
        SearchResult {
            title: doc.title.unwrap_or_default(),
            image_url: doc.image_url.unwrap_or_default(),
            score: doc.score,
            image: None,
        }
    }
}

/// Azure AI Search 的 REST 客户端
pub struct SearchIndexClient {
    client: reqwest::Client,
    endpoint: String,
    index_name: String,
    api_key: String,
    api_version: String,
}

impl SearchIndexClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        index_name: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            api_key: api_key.into(),
            api_version: api_version.into(),
        }
    }

    async fn post(&self, operation: &str, body: &serde_json::Value) -> Result<String, IndexError> {
        let url = format!("{}/indexes/{}/docs/{}", self.endpoint, self.index_name, operation);
        debug!("请求搜索服务: {}", url);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("api-version", &self.api_version)])
            .header("api-key", &self.api_key)
            .json(body)
            .send()
            .await;
        metrics::observe_upstream("search", start.elapsed().as_secs_f64());

        let response = response?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(IndexError::Status { status: status.as_u16(), body: text });
        }
        Ok(text)
    }
}

#[async_trait]
impl VectorIndex for SearchIndexClient {
    async fn upsert(&self, documents: &[IndexDocument]) -> Result<WriteResult, IndexError> {
        let actions = documents
            .iter()
            .map(|document| UpsertAction { action: "mergeOrUpload", document })
            .collect::<Vec<_>>();
        let text = self.post("index", &json!({ "value": actions })).await?;

        let result: WriteResult =
            serde_json::from_str(&text).map_err(|e| IndexError::Decode(e.to_string()))?;
        if let Some(err) = result.first_failure() {
            warn!("{}", err);
        }
        Ok(result)
    }

    async fn search(&self, vector: &[f64], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        let body = json!({
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "k": k,
                "fields": VECTOR_FIELD,
            }],
            "select": SELECT_FIELDS.join(","),
            "top": k,
        });
        let text = self.post("search", &body).await?;

        let parsed: SearchResponse =
            serde_json::from_str(&text).map_err(|e| IndexError::Decode(e.to_string()))?;
        Ok(parsed.value.into_iter().map(SearchResult::from).collect())
    }
}
