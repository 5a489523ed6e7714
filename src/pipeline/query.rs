use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{StreamExt, stream};
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use utoipa::ToSchema;

use super::fetch::ImageFetcher;
use crate::metrics;
use crate::rewrite::{QueryRewriter, RewriteError};
use crate::search_index::{DEFAULT_K, IndexError, VectorIndex};
use crate::storage::{BlobLocator, CredentialError, CredentialMinter};
use crate::types::SearchResult;
use crate::vision::{EmbedError, Embedder};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// 查询请求
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// 用户输入的自然语言查询
    #[serde(default)]
    pub query: Option<String>,
    /// 最多返回的图片数量，默认 5
    #[serde(default)]
    pub max_images: Option<i64>,
}

/// 通过校验的查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidQuery {
    pub query: String,
    pub k: usize,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, max_images: Option<i64>) -> Self {
        Self { query: Some(query.into()), max_images }
    }

    /// 校验请求，失败时不会发出任何网络请求
    pub fn validate(self) -> Result<ValidQuery, QueryError> {
        let query = match self.query {
            Some(query) if !query.trim().is_empty() => query,
            _ => return Err(QueryError::InvalidRequest("The 'query' parameter is required".into())),
        };
        let k = match self.max_images {
            None => DEFAULT_K,
            Some(n) if n >= 1 => n as usize,
            Some(n) => {
                return Err(QueryError::InvalidRequest(format!("max_images 必须为正整数: {n}")));
            }
        };
        Ok(ValidQuery { query, k })
    }
}

/// 为每条结果重新签发凭证并下载图片
pub struct ImageInliner {
    credentials: Arc<dyn CredentialMinter>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageInliner {
    pub fn new(credentials: Arc<dyn CredentialMinter>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { credentials, fetcher }
    }

    async fn download(&self, image_url: &str, authorization: Option<&str>) -> Result<Vec<u8>, String> {
        let locator = BlobLocator::parse(image_url).map_err(|e| e.to_string())?;
        let credential = self
            .credentials
            .mint(&locator, authorization)
            .await
            .map_err(|e: CredentialError| e.to_string())?;
        self.fetcher
            .fetch(&credential.sign_url(locator.url()), authorization)
            .await
            .map_err(|e| e.to_string())
    }

    /// 返回 base64 编码的图片；下载失败时返回错误描述而不是中断整个查询
    pub async fn inline(&self, image_url: &str, authorization: Option<&str>) -> String {
        match self.download(image_url, authorization).await {
            Ok(bytes) => STANDARD.encode(bytes),
            Err(err) => {
                warn!("下载图片失败 {}: {}", image_url, err);
                format!("无法下载图片: {err}")
            }
        }
    }
}

/// 改写查询 → 计算文本向量 → k 近邻搜索 → （可选）内联图片
pub struct QueryPipeline {
    rewriter: Arc<dyn QueryRewriter>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    inliner: Option<ImageInliner>,
    concurrency: usize,
}

impl QueryPipeline {
    pub fn new(
        rewriter: Arc<dyn QueryRewriter>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self { rewriter, embedder, index, inliner: None, concurrency: 1 }
    }

    pub fn inline_images(mut self, inliner: ImageInliner) -> Self {
        self.inliner = Some(inliner);
        self
    }

    /// 同时下载的图片数量
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 校验并执行查询，任何一步失败都会中止整个请求
    pub async fn handle(
        &self,
        request: QueryRequest,
        authorization: Option<&str>,
    ) -> Result<Vec<SearchResult>, QueryError> {
        let query = request.validate()?;
        self.run(&query, authorization).await
    }

    pub async fn run(
        &self,
        query: &ValidQuery,
        authorization: Option<&str>,
    ) -> Result<Vec<SearchResult>, QueryError> {
        let start = Instant::now();

        let rewritten = self.rewriter.rewrite(&query.query).await?;
        info!("改写后的查询: {}", rewritten);

        let vector = self.embedder.embed_text(&rewritten).await?;
        if vector.is_empty() {
            return Err(EmbedError::Decode("视觉服务返回了空向量".into()).into());
        }

        let mut results = self.index.search(&vector, query.k).await?;
        results.truncate(query.k);
        debug!("搜索到 {} 条结果", results.len());

        if let Some(inliner) = &self.inliner {
            let urls = results.iter().map(|result| result.image_url.clone()).collect::<Vec<_>>();
            let images = stream::iter(urls)
                .map(|url| async move { inliner.inline(&url, authorization).await })
                .buffered(self.concurrency)
                .collect::<Vec<_>>()
                .await;
            for (result, image) in results.iter_mut().zip(images) {
                result.image = Some(image);
            }
        }

        metrics::observe_query(self.inliner.is_some(), start.elapsed().as_secs_f64(), results.len());
        Ok(results)
    }
}
