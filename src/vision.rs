//! 视觉服务客户端：把图片或文本转换为同一空间内的嵌入向量

use std::time::Instant;

use async_trait::async_trait;
use log::{debug, error};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::metrics;
use crate::storage::AccessCredential;
use crate::types::EmbeddingVector;

pub const DEFAULT_VISION_API_VERSION: &str = "2023-02-01-preview";

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("请求视觉服务失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("视觉服务返回错误: HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("无法解析视觉服务响应: {0}")]
    Decode(String),
}

/// 图片和文本两种模式使用同一种错误类型，调用方拿不到向量时必须自行处理错误
#[async_trait]
pub trait Embedder: Send + Sync {
    /// `url` 为不带签名的对象地址，`credential` 会拼接在其后交给视觉服务下载
    async fn embed_image(
        &self,
        url: &str,
        credential: &AccessCredential,
    ) -> Result<EmbeddingVector, EmbedError>;

    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, EmbedError>;
}

#[derive(Deserialize)]
struct VectorizeResponse {
    vector: EmbeddingVector,
}

pub struct VisionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

impl VisionClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { client, endpoint, api_key: api_key.into(), api_version: api_version.into() }
    }

    async fn vectorize(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<EmbeddingVector, EmbedError> {
        let url = format!("{}/computervision/retrieval:{}", self.endpoint, operation);
        debug!("请求视觉服务: {}", url);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("api-version", &self.api_version)])
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&body)
            .send()
            .await;
        metrics::observe_upstream("vision", start.elapsed().as_secs_f64());

        let response = response?;
        let status = response.status();
        let text = response.text().await?;
        if status != reqwest::StatusCode::OK {
            error!("视觉服务 {} 返回 {}", operation, status);
            return Err(EmbedError::Status { status: status.as_u16(), body: text });
        }

        let parsed: VectorizeResponse =
            serde_json::from_str(&text).map_err(|e| EmbedError::Decode(e.to_string()))?;
        Ok(parsed.vector)
    }
}

#[async_trait]
impl Embedder for VisionClient {
    async fn embed_image(
        &self,
        url: &str,
        credential: &AccessCredential,
    ) -> Result<EmbeddingVector, EmbedError> {
        self.vectorize("vectorizeImage", json!({ "url": credential.sign_url(url) })).await
    }

    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        self.vectorize("vectorizeText", json!({ "text": text })).await
    }
}
