//! Blob 存储的只读访问凭证（SAS）签发

mod delegation;
mod identity;
mod sas;

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use log::debug;
use thiserror::Error;
use url::{Host, Url};

pub use self::delegation::{UserDelegationKey, request_user_delegation_key};
pub use self::identity::ManagedIdentity;
pub use self::sas::*;
use crate::metrics;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("无效的 blob 地址 {url}: {reason}")]
    InvalidLocator { url: String, reason: String },
    #[error("未配置存储账户密钥")]
    MissingAccountKey,
    #[error("无效的签名密钥: {0}")]
    InvalidKey(String),
    #[error("委托模式缺少身份凭证：既没有转发的 Authorization 头，也未启用托管身份")]
    MissingIdentity,
    #[error("获取托管身份令牌失败: {0}")]
    Identity(String),
    #[error("获取用户委托密钥失败: HTTP {status}: {body}")]
    DelegationStatus { status: u16, body: String },
    #[error("解析用户委托密钥失败: {0}")]
    DelegationDecode(#[from] quick_xml::DeError),
    #[error("请求存储服务失败: {0}")]
    Transport(#[from] reqwest::Error),
}

/// 从 blob 地址中解析出的对象定位信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocator {
    /// 去掉查询参数后的对象地址
    url: Url,
    account: String,
    container: String,
    /// 已经 percent-decode 过的 blob 名
    blob: String,
    /// `scheme://host[:port]`，路径风格地址还会带上 `/account`
    account_url: String,
}

impl BlobLocator {
    /// 解析 blob 地址
    ///
    /// 支持 `https://{account}.blob.core.windows.net/{container}/{blob}`，
    /// 以及模拟器使用的 `http://127.0.0.1:10000/{account}/{container}/{blob}`
    pub fn parse(url: &str) -> Result<Self, CredentialError> {
        let invalid = |reason: &str| CredentialError::InvalidLocator {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let mut parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        parsed.set_query(None);
        parsed.set_fragment(None);

        let host = parsed.host().ok_or_else(|| invalid("缺少主机名"))?;
        let mut origin = format!("{}://{}", parsed.scheme(), host);
        if let Some(port) = parsed.port() {
            origin.push_str(&format!(":{port}"));
        }

        let path = parsed.path().trim_start_matches('/').to_string();
        let (account, rest, account_url) = match host {
            Host::Domain(domain) if domain != "localhost" => {
                let account = domain.split('.').next().unwrap_or_default().to_string();
                (account, path, origin)
            }
            // IP 或 localhost 使用路径风格，第一段路径为账户名
            _ => {
                let (account, rest) = path.split_once('/').ok_or_else(|| invalid("缺少账户名"))?;
                let account_url = format!("{origin}/{account}");
                (account.to_string(), rest.to_string(), account_url)
            }
        };
        if account.is_empty() {
            return Err(invalid("缺少账户名"));
        }

        let (container, blob) = rest.split_once('/').ok_or_else(|| invalid("缺少 blob 名"))?;
        if container.is_empty() || blob.is_empty() {
            return Err(invalid("缺少容器名或 blob 名"));
        }
        let decode = |s: &str| {
            urlencoding::decode(s).map(|s| s.into_owned()).map_err(|e| invalid(&e.to_string()))
        };

        Ok(Self {
            container: decode(container)?,
            blob: decode(blob)?,
            url: parsed,
            account,
            account_url,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn blob(&self) -> &str {
        &self.blob
    }

    pub fn account_url(&self) -> &str {
        &self.account_url
    }
}

/// 只读访问凭证，即 SAS 查询字符串
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    signed_parameters: String,
    start: DateTime<Utc>,
    expiry: DateTime<Utc>,
}

impl AccessCredential {
    pub(crate) fn new(signed_parameters: String, start: DateTime<Utc>, expiry: DateTime<Utc>) -> Self {
        Self { signed_parameters, start, expiry }
    }

    /// 不带 `?` 的查询字符串
    pub fn signed_parameters(&self) -> &str {
        &self.signed_parameters
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// 将凭证拼接到对象地址上
    pub fn sign_url(&self, url: &str) -> String {
        format!("{}?{}", url, self.signed_parameters)
    }
}

// 签名不能出现在日志里
impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("signed_parameters", &"<redacted>")
            .field("start", &self.start)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// 凭证签发方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// 使用存储账户密钥本地签名，有效期 1 小时
    AccountKey,
    /// 先向存储服务申请用户委托密钥再签名，有效期 1 天
    Delegation,
}

#[async_trait]
pub trait CredentialMinter: Send + Sync {
    /// 为单个 blob 签发只读凭证
    ///
    /// `authorization` 为调用方转发过来的 `Authorization` 头，仅委托模式使用
    async fn mint(
        &self,
        locator: &BlobLocator,
        authorization: Option<&str>,
    ) -> Result<AccessCredential, CredentialError>;
}

enum Signer {
    AccountKey(String),
    Delegation { client: reqwest::Client, identity: Option<ManagedIdentity> },
}

/// 默认的凭证签发实现
pub struct BlobCredentials {
    signer: Signer,
}

impl BlobCredentials {
    /// 账户密钥模式，密钥为空时直接失败
    pub fn account_key(key: impl Into<String>) -> Result<Self, CredentialError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CredentialError::MissingAccountKey);
        }
        Ok(Self { signer: Signer::AccountKey(key) })
    }

    /// 委托模式，`identity` 为空时只能依赖调用方转发的 `Authorization` 头
    pub fn delegation(client: reqwest::Client, identity: Option<ManagedIdentity>) -> Self {
        Self { signer: Signer::Delegation { client, identity } }
    }

    pub fn mode(&self) -> CredentialMode {
        match self.signer {
            Signer::AccountKey(_) => CredentialMode::AccountKey,
            Signer::Delegation { .. } => CredentialMode::Delegation,
        }
    }

    /// 以 `now` 作为生效时间签发凭证
    pub async fn mint_at(
        &self,
        locator: &BlobLocator,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AccessCredential, CredentialError> {
        match &self.signer {
            Signer::AccountKey(key) => sign_with_account_key(locator, key, now),
            Signer::Delegation { client, identity } => {
                let authorization = match (authorization, identity) {
                    (Some(header), _) if !header.trim().is_empty() => header.to_string(),
                    (_, Some(identity)) => identity.authorization(client).await?,
                    _ => return Err(CredentialError::MissingIdentity),
                };

                let start = truncate_to_seconds(now);
                let timer = Instant::now();
                let key = request_user_delegation_key(
                    client,
                    locator.account_url(),
                    &authorization,
                    start,
                    start + DELEGATION_VALIDITY,
                )
                .await;
                metrics::observe_upstream("storage", timer.elapsed().as_secs_f64());

                sign_with_delegation_key(locator, &key?, start)
            }
        }
    }
}

#[async_trait]
impl CredentialMinter for BlobCredentials {
    async fn mint(
        &self,
        locator: &BlobLocator,
        authorization: Option<&str>,
    ) -> Result<AccessCredential, CredentialError> {
        debug!("签发只读凭证: {}", locator.url());
        self.mint_at(locator, authorization, Utc::now()).await
    }
}
