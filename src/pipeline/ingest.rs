use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use log::{info, warn};
use thiserror::Error;

use crate::metrics;
use crate::search_index::{IndexError, VectorIndex, document_key};
use crate::storage::{BlobLocator, CredentialError, CredentialMinter};
use crate::types::{ImageRecord, IndexDocument, RecordData, ResponseRecord};
use crate::vision::{EmbedError, Embedder};

/// 单条记录处理失败的原因，对应失败时所处的阶段
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// 签发凭证 → 计算图片向量 → 写入索引
pub struct IngestPipeline {
    credentials: Arc<dyn CredentialMinter>,
    embedder: Arc<dyn Embedder>,
    /// 为空时只返回向量，由调用方自行写入索引
    index: Option<Arc<dyn VectorIndex>>,
    concurrency: usize,
}

impl IngestPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialMinter>,
        embedder: Arc<dyn Embedder>,
        index: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        Self { credentials, embedder, index, concurrency: 1 }
    }

    /// 同时处理的记录数量
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 处理单条记录，任何一步失败都直接返回错误
    pub async fn process(
        &self,
        record: &ImageRecord,
        authorization: Option<&str>,
    ) -> Result<RecordData, IngestError> {
        let locator = BlobLocator::parse(&record.image_url)?;
        let credential = self.credentials.mint(&locator, authorization).await?;
        let vector = self.embedder.embed_image(locator.url(), &credential).await?;

        if let Some(index) = &self.index {
            let document = IndexDocument {
                id: document_key(locator.url()),
                image_url: locator.url().to_string(),
                image_vector: vector.clone(),
                title: locator.blob().to_string(),
            };
            let result = index.upsert(std::slice::from_ref(&document)).await?;
            if let Some(err) = result.first_failure() {
                return Err(err.into());
            }
        }

        Ok(RecordData { image_vector: vector, image_url: record.image_url.clone() })
    }

    /// 记录最终到达的阶段，跳过索引写入时成功的记录停在 embedded
    fn outcome(&self, response: &ResponseRecord) -> &'static str {
        match (response.is_success(), self.index.is_some()) {
            (false, _) => "failed",
            (true, true) => "indexed",
            (true, false) => "embedded",
        }
    }

    /// 按输入顺序逐条产出结果，单条失败不影响其他记录
    pub fn stream<'a>(
        &'a self,
        records: Vec<ImageRecord>,
        authorization: Option<&'a str>,
    ) -> impl Stream<Item = ResponseRecord> + 'a {
        stream::iter(records)
            .map(move |record| async move {
                info!("处理图片 {}: {}", record.record_id, record.image_url);
                let response = match self.process(&record, authorization).await {
                    Ok(data) => ResponseRecord::success(record.record_id, data),
                    Err(err) => {
                        warn!("图片 {} 处理失败: {}", record.record_id, err);
                        ResponseRecord::failure(record.record_id, err)
                    }
                };
                metrics::inc_ingest_record(self.outcome(&response));
                response
            })
            .buffered(self.concurrency)
    }

    /// 处理一批记录，返回结果与输入一一对应
    pub async fn run(
        &self,
        records: Vec<ImageRecord>,
        authorization: Option<&str>,
    ) -> Vec<ResponseRecord> {
        self.stream(records, authorization).collect().await
    }
}
