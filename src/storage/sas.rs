use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{AccessCredential, BlobLocator, CredentialError, UserDelegationKey};

/// SAS 签名版本
pub const SAS_VERSION: &str = "2022-11-02";
/// 账户密钥签发的凭证有效期
pub const ACCOUNT_KEY_VALIDITY: TimeDelta = TimeDelta::hours(1);
/// 委托密钥签发的凭证有效期
pub const DELEGATION_VALIDITY: TimeDelta = TimeDelta::days(1);

/// SAS 中的时间只精确到秒
pub fn format_sas_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub(super) fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

fn canonical_resource(locator: &BlobLocator) -> String {
    format!("/blob/{}/{}/{}", locator.account(), locator.container(), locator.blob())
}

fn hmac_base64(key: &str, string_to_sign: &str) -> Result<String, CredentialError> {
    let key = STANDARD.decode(key.trim()).map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn encode_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// 账户密钥模式下的待签名字符串
pub fn account_key_string_to_sign(locator: &BlobLocator, start: &str, expiry: &str) -> String {
    [
        "r",
        start,
        expiry,
        &canonical_resource(locator),
        "", // signedIdentifier
        "", // signedIP
        "", // signedProtocol
        SAS_VERSION,
        "b",
        "", // signedSnapshotTime
        "", // signedEncryptionScope
        "", // rscc
        "", // rscd
        "", // rsce
        "", // rscl
        "", // rsct
    ]
    .join("\n")
}

/// 委托密钥模式下的待签名字符串
pub fn delegation_string_to_sign(
    locator: &BlobLocator,
    key: &UserDelegationKey,
    start: &str,
    expiry: &str,
) -> String {
    [
        "r",
        start,
        expiry,
        &canonical_resource(locator),
        &key.signed_oid,
        &key.signed_tid,
        &key.signed_start,
        &key.signed_expiry,
        &key.signed_service,
        &key.signed_version,
        "", // signedAuthorizedUserObjectId
        "", // signedUnauthorizedUserObjectId
        "", // signedCorrelationId
        "", // signedIP
        "", // signedProtocol
        SAS_VERSION,
        "b",
        "", // signedSnapshotTime
        "", // signedEncryptionScope
        "", // rscc
        "", // rscd
        "", // rsce
        "", // rscl
        "", // rsct
    ]
    .join("\n")
}

/// 使用账户密钥签发只读凭证，有效期为 `[start, start + 1h]`
pub fn sign_with_account_key(
    locator: &BlobLocator,
    account_key: &str,
    start: DateTime<Utc>,
) -> Result<AccessCredential, CredentialError> {
    let start = truncate_to_seconds(start);
    let expiry = start + ACCOUNT_KEY_VALIDITY;
    let (st, se) = (format_sas_time(start), format_sas_time(expiry));

    let signature = hmac_base64(account_key, &account_key_string_to_sign(locator, &st, &se))?;
    let query = encode_query(&[
        ("sp", "r"),
        ("st", &st),
        ("se", &se),
        ("sv", SAS_VERSION),
        ("sr", "b"),
        ("sig", &signature),
    ]);
    Ok(AccessCredential::new(query, start, expiry))
}

/// 使用用户委托密钥签发只读凭证，有效期为 `[start, start + 1d]`
pub fn sign_with_delegation_key(
    locator: &BlobLocator,
    key: &UserDelegationKey,
    start: DateTime<Utc>,
) -> Result<AccessCredential, CredentialError> {
    let start = truncate_to_seconds(start);
    let expiry = start + DELEGATION_VALIDITY;
    let (st, se) = (format_sas_time(start), format_sas_time(expiry));

    let signature = hmac_base64(&key.value, &delegation_string_to_sign(locator, key, &st, &se))?;
    let query = encode_query(&[
        ("sp", "r"),
        ("st", &st),
        ("se", &se),
        ("skoid", &key.signed_oid),
        ("sktid", &key.signed_tid),
        ("skt", &key.signed_start),
        ("ske", &key.signed_expiry),
        ("sks", &key.signed_service),
        ("skv", &key.signed_version),
        ("sv", SAS_VERSION),
        ("sr", "b"),
        ("sig", &signature),
    ]);
    Ok(AccessCredential::new(query, start, expiry))
}
