//! Alibaba Cloud コンテナレジストリ API の署名付き HTTP クライアント
//!
//! レジストリの API は2種類の署名方式を使う。
//! - ROA（`cr` API, 2016-06-07）: REST パス、`Authorization: acs <key>:<sig>`
//! - RPC（`cr` Enterprise API, 2018-12-01）: `Action=` クエリと `Signature=` パラメータ
//!
//! どちらも HMAC-SHA1 で署名し、ダイジェストを base64 にする。

use crate::error::{RegistryError, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha1::Sha1;
use std::collections::BTreeMap;

type HmacSha1 = Hmac<Sha1>;

pub(crate) const ROA_VERSION: &str = "2016-06-07";
pub(crate) const RPC_VERSION: &str = "2018-12-01";

/// リージョンの既定 API エンドポイント
pub(crate) fn default_endpoint(region: &str) -> String {
    format!("https://cr.{}.aliyuncs.com", region)
}

pub(crate) struct AcsClient {
    http: reqwest::Client,
    /// エラーメッセージに使うレジストリ名
    label: String,
    endpoint: String,
    region: String,
    access_key: String,
    secret: String,
}

impl AcsClient {
    pub(crate) fn new(
        label: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            label: label.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            region: region.into(),
            access_key: access_key.into(),
            secret: secret.into(),
        }
    }

    /// ROA 形式の GET（`path` は `/` で始まる）
    pub(crate) async fn roa_get<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let nonce = uuid::Uuid::new_v4().to_string();

        let mut acs_headers = BTreeMap::new();
        acs_headers.insert("x-acs-region-id".to_string(), self.region.clone());
        acs_headers.insert("x-acs-signature-method".to_string(), "HMAC-SHA1".to_string());
        acs_headers.insert("x-acs-signature-nonce".to_string(), nonce);
        acs_headers.insert("x-acs-signature-version".to_string(), "1.0".to_string());
        acs_headers.insert("x-acs-version".to_string(), ROA_VERSION.to_string());

        let string_to_sign = roa_string_to_sign("GET", "application/json", &date, &acs_headers, path);
        let signature = sign(&self.secret, &string_to_sign)
            .map_err(|e| RegistryError::auth(&self.label, operation, e))?;

        let mut request = self
            .http
            .get(format!("{}{}", self.endpoint, path))
            .header("Accept", "application/json")
            .header("Date", &date)
            .header(
                "Authorization",
                format!("acs {}:{}", self.access_key, signature),
            );
        for (key, value) in &acs_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        tracing::debug!(registry = %self.label, operation, path, "ROA request");
        self.send(operation, request).await
    }

    /// RPC 形式の GET
    pub(crate) async fn rpc_get<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let mut query: BTreeMap<String, String> = BTreeMap::new();
        query.insert("Action".into(), action.into());
        query.insert("Version".into(), RPC_VERSION.into());
        query.insert("Format".into(), "JSON".into());
        query.insert("AccessKeyId".into(), self.access_key.clone());
        query.insert("SignatureMethod".into(), "HMAC-SHA1".into());
        query.insert("SignatureVersion".into(), "1.0".into());
        query.insert("SignatureNonce".into(), uuid::Uuid::new_v4().to_string());
        query.insert(
            "Timestamp".into(),
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        query.insert("RegionId".into(), self.region.clone());
        for (key, value) in params {
            query.insert((*key).to_string(), (*value).to_string());
        }

        let signature = sign(&format!("{}&", self.secret), &rpc_string_to_sign(&query))
            .map_err(|e| RegistryError::auth(&self.label, action, e))?;
        query.insert("Signature".into(), signature);

        let url = format!("{}/?{}", self.endpoint, canonical_query(&query));

        tracing::debug!(registry = %self.label, action, "RPC request");
        self.send(action, self.http.get(url)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RegistryError::api(
                &self.label,
                operation,
                error_message(status.as_u16(), &body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            RegistryError::api(&self.label, operation, format!("unexpected response: {}", e))
        })
    }
}

/// エラーボディから `code`/`message` を取り出す（大文字小文字の揺れを吸収）
fn error_message(status: u16, body: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return format!("HTTP {}: {}", status, body.trim()),
    };
    let field = |lower: &str, upper: &str| {
        value
            .get(lower)
            .or_else(|| value.get(upper))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    match (field("code", "Code"), field("message", "Message")) {
        (Some(code), Some(message)) => format!("HTTP {}: {} ({})", status, message, code),
        (Some(code), None) => format!("HTTP {}: {}", status, code),
        (None, Some(message)) => format!("HTTP {}: {}", status, message),
        (None, None) => format!("HTTP {}: {}", status, body.trim()),
    }
}

fn sign(secret: &str, data: &str) -> std::result::Result<String, String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(data.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// `METHOD\nAccept\nContent-MD5\nContent-Type\nDate\n<x-acs headers><resource>`
fn roa_string_to_sign(
    method: &str,
    accept: &str,
    date: &str,
    acs_headers: &BTreeMap<String, String>,
    resource: &str,
) -> String {
    let mut out = format!("{}\n{}\n\n\n{}\n", method, accept, date);
    for (key, value) in acs_headers {
        out.push_str(&key.to_lowercase());
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push_str(resource);
    out
}

fn rpc_string_to_sign(query: &BTreeMap<String, String>) -> String {
    format!(
        "GET&{}&{}",
        percent_encode("/"),
        percent_encode(&canonical_query(query))
    )
}

fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 のエンコード（`A-Z a-z 0-9 - _ . ~` 以外をエスケープ）
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
