//! レジストリバックエンドの抽象化
//!
//! 各プロバイダ（AliCloud、AliCloud 企業版、AWS ECR、Docker Hub 互換、匿名の
//! パブリックレジストリ）が [`RegistryBackend`] を実装する。[`Backend`] は
//! 設定の1エントリから作るタグ付き共用体。

mod alicloud;
mod alicloud_ee;
mod aws;
mod dockerhub;
mod lifecycle;
mod public;

pub use alicloud::AliCloudRegistry;
pub use alicloud_ee::AliCloudEeRegistry;
pub use aws::{AwsEcrRegistry, decode_authorization_token};
pub use dockerhub::{DOCKER_HUB_AUTH_ADDRESS, DOCKER_HUB_HOST, DockerHubRegistry};
pub use lifecycle::{LifecyclePolicy, LifecycleRule, default_lifecycle_policy};
pub use public::PublicRegistry;

use crate::credentials::Credentials;
use crate::error::{RegistryError, Result};
use crate::model::RegistryEntry;
use async_trait::async_trait;
use std::fmt;

/// バックエンドのプロバイダ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    AliCloud,
    AliCloudEnterprise,
    AwsEcr,
    DockerHub,
    Public,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AliCloud => "AliCloud",
            Self::AliCloudEnterprise => "AliCloud EE",
            Self::AwsEcr => "AWS ECR",
            Self::DockerHub => "DockerHub",
            Self::Public => "Public",
        };
        f.write_str(name)
    }
}

/// 全プロバイダ共通の操作
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    fn kind(&self) -> RegistryKind;

    /// `repo` が無ければ作る。冪等。プッシュ時に自動で作られるレジストリでは何もしない
    async fn create_repo_if_not_exists(&self, repo: &str) -> Result<()>;

    /// プッシュするイメージ名の接頭辞（`host[/namespace]`）
    async fn domain_prefix(&self) -> Result<String>;

    /// ビルドエンジンが認証情報を要求するホスト名
    async fn host(&self) -> Result<String>;

    /// プッシュ・プル用の認証情報
    async fn fetch_credentials(&self) -> Result<Credentials>;

    /// `repo` の最新タグ
    async fn latest_tag(&self, repo: &str) -> Result<String>;

    /// `image` がこのレジストリのものか
    async fn matches_image(&self, image: &str) -> bool;

    /// 必須項目が揃っているか確認する
    fn verify(&self) -> Result<()>;
}

/// 設定されたレジストリ（プロバイダはちょうど1つ）
#[derive(Debug)]
pub enum Backend {
    AliCloud(AliCloudRegistry),
    AliCloudEnterprise(AliCloudEeRegistry),
    AwsEcr(AwsEcrRegistry),
    DockerHub(DockerHubRegistry),
    Public(PublicRegistry),
}

macro_rules! delegate {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            Backend::AliCloud($inner) => $call,
            Backend::AliCloudEnterprise($inner) => $call,
            Backend::AwsEcr($inner) => $call,
            Backend::DockerHub($inner) => $call,
            Backend::Public($inner) => $call,
        }
    };
}

impl Backend {
    /// 設定エントリからバックエンドを作る
    ///
    /// プロバイダ節の無いエントリはパブリック扱い。2つ以上あればエラー。
    pub fn from_entry(entry: &RegistryEntry) -> Result<Self> {
        let populated = entry.populated_variants();
        if populated.len() > 1 {
            return Err(RegistryError::Config(format!(
                "registry '{}' has more than one provider section ({})",
                entry.name,
                populated.join(", ")
            )));
        }

        let name = entry.name.clone();
        let backend = if let Some(cfg) = &entry.aliyun {
            Self::AliCloud(AliCloudRegistry::new(name, cfg.clone()))
        } else if let Some(cfg) = &entry.aliyun_ee {
            Self::AliCloudEnterprise(AliCloudEeRegistry::new(name, cfg.clone()))
        } else if let Some(cfg) = &entry.aws {
            Self::AwsEcr(AwsEcrRegistry::new(name, cfg.clone()))
        } else if let Some(cfg) = &entry.dockerhub {
            Self::DockerHub(DockerHubRegistry::new(name, cfg.clone()))
        } else {
            Self::Public(PublicRegistry::new(name))
        };
        Ok(backend)
    }

    /// どれにも一致しないときに使う匿名バックエンド
    pub fn public() -> Self {
        Self::Public(PublicRegistry::default())
    }

    /// 設定上の名前（リゾルバのフォールバックは空）
    pub fn name(&self) -> &str {
        delegate!(self, inner => inner.name())
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public(_))
    }
}

#[async_trait]
impl RegistryBackend for Backend {
    fn kind(&self) -> RegistryKind {
        delegate!(self, inner => inner.kind())
    }

    async fn create_repo_if_not_exists(&self, repo: &str) -> Result<()> {
        delegate!(self, inner => inner.create_repo_if_not_exists(repo).await)
    }

    async fn domain_prefix(&self) -> Result<String> {
        delegate!(self, inner => inner.domain_prefix().await)
    }

    async fn host(&self) -> Result<String> {
        delegate!(self, inner => inner.host().await)
    }

    async fn fetch_credentials(&self) -> Result<Credentials> {
        delegate!(self, inner => inner.fetch_credentials().await)
    }

    async fn latest_tag(&self, repo: &str) -> Result<String> {
        delegate!(self, inner => inner.latest_tag(repo).await)
    }

    async fn matches_image(&self, image: &str) -> bool {
        delegate!(self, inner => inner.matches_image(image).await)
    }

    fn verify(&self) -> Result<()> {
        delegate!(self, inner => inner.verify())
    }
}

/// 最初の空の必須項目について `"<field> cannot be empty"` を返す
pub(crate) fn require_fields(registry: &str, fields: &[(&str, &str)]) -> Result<()> {
    for (field, value) in fields {
        if value.is_empty() {
            return Err(RegistryError::Config(format!(
                "{}: {} cannot be empty",
                registry, field
            )));
        }
    }
    Ok(())
}
