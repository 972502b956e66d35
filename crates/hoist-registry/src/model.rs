//! レジストリ設定のデータモデル
//!
//! `~/.hoist.yaml` の `registries` セクションに対応する。

use serde::{Deserialize, Deserializer, Serialize};

/// レジストリ設定ファイル全体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    /// デフォルトで使うレジストリ名（省略時は先頭のエントリ）
    #[serde(
        rename = "default-registry",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_registry: Option<String>,

    /// 設定順に並んだレジストリ定義
    #[serde(default)]
    pub registries: Vec<RegistryEntry>,
}

/// 名前付きのレジストリ定義
///
/// プロバイダ節は高々1つだけ指定する。何も指定しない場合は Public（匿名）扱い。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliyun: Option<AliCloudConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliyun_ee: Option<AliCloudEeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerhub: Option<DockerHubConfig>,
}

impl RegistryEntry {
    /// 指定されているプロバイダ節の名前一覧
    pub fn populated_variants(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.aliyun.is_some() {
            out.push("aliyun");
        }
        if self.aliyun_ee.is_some() {
            out.push("aliyun_ee");
        }
        if self.aws.is_some() {
            out.push("aws");
        }
        if self.dockerhub.is_some() {
            out.push("dockerhub");
        }
        out
    }
}

/// Alibaba Cloud Container Registry（個人版）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliCloudConfig {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_access_key: String,

    /// API エンドポイントの上書き（既定: `https://cr.<region>.aliyuncs.com`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl AliCloudConfig {
    pub fn has_static_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn has_access_key(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_access_key.is_empty()
    }
}

/// Alibaba Cloud Container Registry（企業版）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliCloudEeConfig {
    #[serde(flatten)]
    pub base: AliCloudConfig,

    #[serde(default)]
    pub instance_id: String,

    /// インスタンスのホスト名。空の場合は API から取得する
    #[serde(default)]
    pub instance_host: String,
}

/// Amazon ECR
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: String,

    /// YAML で数値として書かれていても文字列として受け付ける
    #[serde(default, deserialize_with = "string_or_number")]
    pub account_id: String,

    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_access_key: String,

    /// リポジトリ作成時に設定するライフサイクルポリシー（JSON）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_policy_text: Option<String>,

    /// ECR エンドポイントの上書き
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Docker Hub 互換レジストリ
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerHubConfig {
    #[serde(default)]
    pub namespace: String,
    /// 空の場合は Docker Hub
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
