use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::cli::*;
use crate::pipeline::{HttpImageFetcher, ImageInliner, IngestPipeline, QueryPipeline};
use crate::rewrite::{ChatClient, QueryRewriter};
use crate::search_index::{DEFAULT_SEARCH_API_VERSION, SearchIndexClient, VectorIndex};
use crate::storage::{BlobCredentials, CredentialMinter, CredentialMode, ManagedIdentity};
use crate::vision::{DEFAULT_VISION_API_VERSION, Embedder, VisionClient};

/// 外部服务配置，进程启动时从命令行或环境变量读取一次
#[derive(Parser, Debug, Clone)]
pub struct ServiceOptions {
    /// 视觉服务地址
    #[arg(long, global = true, env = "AI_VISION_ENDPOINT")]
    pub vision_endpoint: Option<String>,
    /// 视觉服务密钥
    #[arg(long, global = true, env = "AI_VISION_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,
    /// 视觉服务 API 版本
    #[arg(long, global = true, env = "VISION_API_VERSION", default_value = DEFAULT_VISION_API_VERSION)]
    pub vision_api_version: String,

    /// Azure OpenAI 地址
    #[arg(long, global = true, env = "AZURE_OPENAI_ENDPOINT")]
    pub openai_endpoint: Option<String>,
    /// Azure OpenAI 密钥
    #[arg(long, global = true, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    /// 用于改写查询的模型部署名
    #[arg(long, global = true, env = "OPEN_AI_MODEL")]
    pub openai_model: Option<String>,
    /// Azure OpenAI API 版本
    #[arg(long, global = true, env = "API_VERSION")]
    pub openai_api_version: Option<String>,

    /// 搜索服务地址
    #[arg(long, global = true, env = "AI_SEARCH_AI_SEARCH_SERVICE_ENDPOINT")]
    pub search_endpoint: Option<String>,
    /// 搜索服务管理密钥
    #[arg(long, global = true, env = "AZURE_SEARCH_ADMIN_KEY", hide_env_values = true)]
    pub search_api_key: Option<String>,
    /// 索引名称
    #[arg(long, global = true, env = "AI_SEARCH_AI_SEARCH_INDEX_NAME")]
    pub search_index: Option<String>,
    /// 搜索服务 API 版本
    #[arg(long, global = true, env = "SEARCH_API_VERSION", default_value = DEFAULT_SEARCH_API_VERSION)]
    pub search_api_version: String,

    /// 凭证签发方式
    #[arg(long, global = true, value_enum, env = "CREDENTIAL_MODE", default_value_t = CredentialMode::AccountKey)]
    pub credential_mode: CredentialMode,
    /// 存储账户密钥，account-key 模式必填
    #[arg(long, global = true, env = "ACCOUNT_KEY", hide_env_values = true)]
    pub account_key: Option<String>,
    /// 委托模式下，调用方没有转发 Authorization 头时使用托管身份
    #[arg(long, global = true, env = "USE_MANAGED_IDENTITY")]
    pub managed_identity: bool,
    /// 用户分配的托管身份 client id
    #[arg(long, global = true, env = "AZURE_CLIENT_ID")]
    pub managed_identity_client_id: Option<String>,

    /// 查询结果中内联 base64 编码的图片
    #[arg(long, global = true, env = "INLINE_IMAGES")]
    pub inline_images: bool,
    /// 只计算向量，不写入索引
    #[arg(long, global = true, env = "SKIP_INDEX_WRITE")]
    pub skip_index_write: bool,
    /// 同时处理的图片数量
    #[arg(long, global = true, value_name = "N", env = "INGEST_CONCURRENCY", default_value_t = num_cpus::get())]
    pub concurrency: usize,
    /// 每个外部请求的超时时间，单位为秒
    #[arg(long, global = true, value_name = "SECS", env = "HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout: u64,
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("缺少配置 {}", name))
}

impl ServiceOptions {
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(Duration::from_secs(self.http_timeout)).build()?)
    }

    pub fn credentials(&self, client: &reqwest::Client) -> Result<Arc<dyn CredentialMinter>> {
        let minter = match self.credential_mode {
            CredentialMode::AccountKey => {
                BlobCredentials::account_key(require(&self.account_key, "ACCOUNT_KEY")?)?
            }
            CredentialMode::Delegation => {
                let identity = self
                    .managed_identity
                    .then(|| ManagedIdentity::from_env(self.managed_identity_client_id.clone()));
                BlobCredentials::delegation(client.clone(), identity)
            }
        };
        Ok(Arc::new(minter))
    }

    pub fn embedder(&self, client: &reqwest::Client) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(VisionClient::new(
            client.clone(),
            require(&self.vision_endpoint, "AI_VISION_ENDPOINT")?,
            require(&self.vision_api_key, "AI_VISION_API_KEY")?,
            &self.vision_api_version,
        )))
    }

    pub fn rewriter(&self, client: &reqwest::Client) -> Result<Arc<dyn QueryRewriter>> {
        Ok(Arc::new(ChatClient::new(
            client.clone(),
            require(&self.openai_endpoint, "AZURE_OPENAI_ENDPOINT")?,
            require(&self.openai_api_key, "AZURE_OPENAI_API_KEY")?,
            require(&self.openai_model, "OPEN_AI_MODEL")?,
            require(&self.openai_api_version, "API_VERSION")?,
        )))
    }

    pub fn search_index(&self, client: &reqwest::Client) -> Result<Arc<dyn VectorIndex>> {
        Ok(Arc::new(SearchIndexClient::new(
            client.clone(),
            require(&self.search_endpoint, "AI_SEARCH_AI_SEARCH_SERVICE_ENDPOINT")?,
            require(&self.search_index, "AI_SEARCH_AI_SEARCH_INDEX_NAME")?,
            require(&self.search_api_key, "AZURE_SEARCH_ADMIN_KEY")?,
            &self.search_api_version,
        )))
    }

    pub fn ingest_pipeline(&self, client: &reqwest::Client) -> Result<IngestPipeline> {
        let index = match self.skip_index_write {
            true => None,
            false => Some(self.search_index(client)?),
        };
        Ok(IngestPipeline::new(self.credentials(client)?, self.embedder(client)?, index)
            .concurrency(self.concurrency))
    }

    pub fn query_pipeline(&self, client: &reqwest::Client) -> Result<QueryPipeline> {
        let mut pipeline =
            QueryPipeline::new(self.rewriter(client)?, self.embedder(client)?, self.search_index(client)?)
                .concurrency(self.concurrency);
        if self.inline_images {
            let fetcher = Arc::new(HttpImageFetcher::new(client.clone()));
            pipeline = pipeline.inline_images(ImageInliner::new(self.credentials(client)?, fetcher));
        }
        Ok(pipeline)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "visearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    #[command(flatten)]
    pub service: ServiceOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 服务
    Server(ServerCommand),
    /// 计算图片向量并写入索引
    Ingest(IngestCommand),
    /// 使用自然语言搜索图片
    Search(SearchCommand),
    /// 为单个 blob 签发只读访问地址
    Sign(SignCommand),
}
