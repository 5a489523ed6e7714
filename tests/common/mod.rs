#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use visearch::pipeline::{FetchError, ImageFetcher};
use visearch::rewrite::{QueryRewriter, RewriteError};
use visearch::search_index::{DocumentStatus, IndexError, VectorIndex, WriteResult};
use visearch::storage::{AccessCredential, BlobCredentials, CredentialMinter};
use visearch::types::{EmbeddingVector, IndexDocument, SearchResult};
use visearch::vision::{EmbedError, Embedder};

/// base64("key")
pub const ACCOUNT_KEY: &str = "a2V5";

pub fn credentials() -> Arc<dyn CredentialMinter> {
    Arc::new(BlobCredentials::account_key(ACCOUNT_KEY).unwrap())
}

/// 按地址返回预设向量，未登记的地址返回 HTTP 500
#[derive(Default)]
pub struct MockEmbedder {
    pub images: HashMap<String, EmbeddingVector>,
    pub delays: HashMap<String, Duration>,
    pub text: Option<EmbeddingVector>,
    pub image_calls: Mutex<Vec<String>>,
    pub text_calls: Mutex<Vec<String>>,
}

impl MockEmbedder {
    pub fn with_image(mut self, url: &str, vector: &[f64]) -> Self {
        self.images.insert(url.to_string(), vector.to_vec());
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn with_text(mut self, vector: &[f64]) -> Self {
        self.text = Some(vector.to_vec());
        self
    }

    pub fn calls(&self) -> usize {
        self.image_calls.lock().unwrap().len() + self.text_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_image(
        &self,
        url: &str,
        credential: &AccessCredential,
    ) -> Result<EmbeddingVector, EmbedError> {
        assert!(credential.sign_url(url).contains("sig="));
        self.image_calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| EmbedError::Status { status: 500, body: "boom".into() })
    }

    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        self.text_calls.lock().unwrap().push(text.to_string());
        self.text.clone().ok_or_else(|| EmbedError::Status { status: 503, body: "down".into() })
    }
}

pub struct MockRewriter {
    pub output: Option<String>,
    pub calls: AtomicUsize,
}

impl MockRewriter {
    pub fn new(output: Option<&str>) -> Self {
        Self { output: output.map(str::to_string), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl QueryRewriter for MockRewriter {
    async fn rewrite(&self, _query: &str) -> Result<String, RewriteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output.clone().ok_or(RewriteError::EmptyCompletion)
    }
}

/// 内存中的索引，搜索时按写入顺序返回文档，分数递减
#[derive(Default)]
pub struct MemoryIndex {
    pub documents: Mutex<Vec<IndexDocument>>,
    pub preset: Option<Vec<SearchResult>>,
    pub searches: Mutex<Vec<(Vec<f64>, usize)>>,
    pub reject: bool,
}

impl MemoryIndex {
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self { preset: Some(results), ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.documents.lock().unwrap().len() + self.searches.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, documents: &[IndexDocument]) -> Result<WriteResult, IndexError> {
        let mut stored = self.documents.lock().unwrap();
        let mut statuses = vec![];
        for document in documents {
            stored.retain(|d| d.id != document.id);
            stored.push(document.clone());
            statuses.push(DocumentStatus {
                key: document.id.clone(),
                status: !self.reject,
                error_message: self.reject.then(|| "rejected".to_string()),
                status_code: if self.reject { 400 } else { 200 },
            });
        }
        Ok(WriteResult { documents: statuses })
    }

    async fn search(&self, vector: &[f64], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        self.searches.lock().unwrap().push((vector.to_vec(), k));
        if let Some(results) = &self.preset {
            return Ok(results.clone());
        }
        let stored = self.documents.lock().unwrap();
        Ok(stored
            .iter()
            .enumerate()
            .map(|(i, d)| SearchResult {
                title: d.title.clone(),
                image_url: d.image_url.clone(),
                score: 1.0 - i as f64 * 0.1,
                image: None,
            })
            .take(k)
            .collect())
    }
}

pub fn result(title: &str, score: f64) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        image_url: format!("https://acct.blob.core.windows.net/c/{title}"),
        score,
        image: None,
    }
}

/// 只有登记过的 blob 能下载成功
#[derive(Default)]
pub struct MockFetcher {
    pub images: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn fetch(&self, signed_url: &str, _authorization: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let url = signed_url.split('?').next().unwrap_or_default();
        self.images.get(url).cloned().ok_or(FetchError::Status(404))
    }
}
