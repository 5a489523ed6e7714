use std::fmt;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

use super::{CredentialError, format_sas_time};

/// 获取用户委托密钥使用的 API 版本
const DELEGATION_API_VERSION: &str = "2024-08-04";

/// 存储服务返回的用户委托密钥
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDelegationKey {
    pub signed_oid: String,
    pub signed_tid: String,
    pub signed_start: String,
    pub signed_expiry: String,
    pub signed_service: String,
    pub signed_version: String,
    /// base64 编码的签名密钥
    pub value: String,
}

impl fmt::Debug for UserDelegationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDelegationKey")
            .field("signed_oid", &self.signed_oid)
            .field("signed_tid", &self.signed_tid)
            .field("signed_start", &self.signed_start)
            .field("signed_expiry", &self.signed_expiry)
            .field("signed_service", &self.signed_service)
            .field("signed_version", &self.signed_version)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl UserDelegationKey {
    /// 从 XML 响应中解析
    pub fn from_xml(xml: &str) -> Result<Self, CredentialError> {
        let xml = xml.trim_start_matches('\u{feff}');
        Ok(quick_xml::de::from_str(xml)?)
    }
}

/// 向存储服务申请 `[start, expiry]` 内有效的用户委托密钥
///
/// `authorization` 为完整的 `Authorization` 头，例如 `Bearer xxx`。
/// 非 200 响应直接作为错误返回，不做重试
pub async fn request_user_delegation_key(
    client: &reqwest::Client,
    account_url: &str,
    authorization: &str,
    start: DateTime<Utc>,
    expiry: DateTime<Utc>,
) -> Result<UserDelegationKey, CredentialError> {
    let url = format!("{}/?restype=service&comp=userdelegationkey", account_url.trim_end_matches('/'));
    let body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><KeyInfo><Start>{}</Start><Expiry>{}</Expiry></KeyInfo>"#,
        format_sas_time(start),
        format_sas_time(expiry),
    );

    debug!("申请用户委托密钥: {}", account_url);
    let response = client
        .post(&url)
        .header(reqwest::header::AUTHORIZATION, authorization)
        .header("x-ms-version", DELEGATION_API_VERSION)
        .header(reqwest::header::CONTENT_TYPE, "application/xml")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    if status != reqwest::StatusCode::OK {
        return Err(CredentialError::DelegationStatus { status: status.as_u16(), body: text });
    }

    UserDelegationKey::from_xml(&text)
}
