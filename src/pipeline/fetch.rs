use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use crate::metrics;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
}

/// 下载图片原始内容
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// `signed_url` 已带有访问凭证，`authorization` 为调用方转发的 `Authorization` 头
    async fn fetch(&self, signed_url: &str, authorization: Option<&str>) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, signed_url: &str, authorization: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(signed_url);
        if let Some(authorization) = authorization {
            request = request
                .header(reqwest::header::AUTHORIZATION, authorization)
                .header("x-ms-version", "2024-08-04");
        }

        debug!("下载图片: {}", signed_url.split('?').next().unwrap_or_default());
        let start = Instant::now();
        let response = request.send().await;
        metrics::observe_upstream("storage", start.elapsed().as_secs_f64());

        let response = response?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
