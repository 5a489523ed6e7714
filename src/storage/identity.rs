use log::debug;
use serde::Deserialize;

use super::CredentialError;

/// 申请令牌时使用的资源
const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
/// 实例元数据服务地址，App Service 之外的环境使用
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// 运行环境提供的托管身份
#[derive(Clone)]
pub struct ManagedIdentity {
    endpoint: String,
    /// App Service 注入的 `IDENTITY_HEADER`，为空时按实例元数据服务处理
    identity_header: Option<String>,
    client_id: Option<String>,
}

impl ManagedIdentity {
    pub fn new(endpoint: impl Into<String>, identity_header: Option<String>) -> Self {
        Self { endpoint: endpoint.into(), identity_header, client_id: None }
    }

    /// 根据 `IDENTITY_ENDPOINT` / `IDENTITY_HEADER` 判断运行环境
    pub fn from_env(client_id: Option<String>) -> Self {
        let endpoint = std::env::var("IDENTITY_ENDPOINT").ok();
        let header = std::env::var("IDENTITY_HEADER").ok();
        let identity = match (endpoint, header) {
            (Some(endpoint), Some(header)) => Self::new(endpoint, Some(header)),
            _ => Self::new(IMDS_ENDPOINT, None),
        };
        identity.with_client_id(client_id)
    }

    /// 指定用户分配的托管身份
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    /// 获取访问存储服务的令牌，返回完整的 `Authorization` 头
    pub async fn authorization(&self, client: &reqwest::Client) -> Result<String, CredentialError> {
        let mut query = vec![("resource", STORAGE_RESOURCE)];
        let request = match &self.identity_header {
            Some(header) => {
                query.push(("api-version", "2019-08-01"));
                client.get(&self.endpoint).header("X-IDENTITY-HEADER", header)
            }
            None => {
                query.push(("api-version", "2018-02-01"));
                client.get(&self.endpoint).header("Metadata", "true")
            }
        };
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        debug!("获取托管身份令牌: {}", self.endpoint);
        let response = request.query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Identity(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| CredentialError::Identity(e.to_string()))?;
        Ok(format!("Bearer {}", token.access_token))
    }
}
